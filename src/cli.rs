
//! Command-line interface for hashclust.
//!
//! Each analysis is a subcommand. Commands that read a saved presence store share the
//! filter options in `FilterArgs`, which are validated here and again when converted
//! to `FilterParams`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::classify::PangenomeRank;
use crate::filter::{DEFAULT_MIN_PRESENCE, FilterParams, parse_rank_list};
use crate::hdbscan::DEFAULT_MIN_CLUSTER_SIZE;
use crate::ingest::{DEFAULT_KSIZE, DEFAULT_MIN_ABUND, DEFAULT_SCALED};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(styles=get_styles())]
#[command(disable_help_subcommand = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Number of threads to use
    #[arg(short, long, global = true, default_value_t = 1, value_parser = validate_threads)]
    pub threads: usize,

    /// Also write log messages to this file
    #[arg(long, global = true, value_parser = clap::value_parser!(PathBuf))]
    pub log_file: Option<PathBuf>,

    /// Report debug messages
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build a presence store from sample sketches
    Presence(PresenceArgs),

    /// Assign prevalence categories to the hashes of a presence store
    Classify(ClassifyArgs),

    /// Build the hash-by-hash association matrix
    HashAssoc(HashAssocArgs),

    /// Write the sample-by-hash presence table
    HashBySample(HashBySampleArgs),

    /// Cluster co-occurring hashes
    Cluster(ClusterArgs),

    /// List samples whose gather results have an abundant match
    KeepList(KeepListArgs),
}

/// Digit string of pangenome ranks, e.g. `123`.
#[derive(Clone, Debug)]
pub struct RankList(pub Vec<PangenomeRank>);

#[derive(Args)]
pub struct FilterArgs {
    /// Downsample the store to this scaled value before analysis
    #[arg(long, help_heading = "Filtering", value_parser = validate_scaled)]
    pub scaled: Option<u64>,

    /// Minimum number of samples a hash must be present in
    #[arg(short = 'm', long, help_heading = "Filtering", default_value_t = DEFAULT_MIN_PRESENCE, value_parser = validate_min_presence)]
    pub min_presence: usize,

    /// Pangenome ranks to keep, as a digit string (1 = central core .. 5 = surface cloud)
    #[arg(long, help_heading = "Filtering", value_parser = validate_rank_list)]
    pub pangenome_types: Option<RankList>,
}

impl FilterArgs {
    pub fn to_params(&self) -> crate::error::Result<FilterParams> {
        FilterParams::new(
            self.scaled,
            self.min_presence,
            self.pangenome_types.as_ref().map(|ranks| ranks.0.clone()),
        )
    }
}

#[derive(Args)]
pub struct PresenceArgs {
    /// Sample sketch files to scan
    #[arg(required = true, help_heading = "Inputs", value_parser = clap::value_parser!(PathBuf))]
    pub sketches: Vec<PathBuf>,

    /// Ranktable CSV of reference hashes (hashval, pangenome_classification)
    #[arg(long, help_heading = "Inputs", required_unless_present = "source_sketch", conflicts_with = "source_sketch", value_parser = clap::value_parser!(PathBuf))]
    pub ranktable: Option<PathBuf>,

    /// Sketch file whose hashes form the reference query
    #[arg(long, help_heading = "Inputs", value_parser = clap::value_parser!(PathBuf))]
    pub source_sketch: Option<PathBuf>,

    /// Only scan samples listed in this file (one name per line)
    #[arg(long, help_heading = "Inputs", value_parser = clap::value_parser!(PathBuf))]
    pub filter_samples: Option<PathBuf>,

    /// Output presence store
    #[arg(short = 'o', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub output: PathBuf,

    /// Write a categories CSV of the included samples
    #[arg(short = 'C', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub category_out: Option<PathBuf>,

    /// Length of k-mers to use
    #[arg(short, long, help_heading = "Sketch parameters", default_value_t = DEFAULT_KSIZE, value_parser = validate_ksize)]
    pub ksize: u32,

    /// Sketch scaling factor to build the store at
    #[arg(short = 's', long, help_heading = "Sketch parameters", default_value_t = DEFAULT_SCALED, value_parser = validate_scaled)]
    pub scaled: u64,
}

#[derive(Args)]
pub struct ClassifyArgs {
    /// Presence store to classify
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    pub store: PathBuf,

    /// Output ranktable CSV
    #[arg(short = 'o', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub output: PathBuf,

    /// Also save a copy of the store carrying the new categories
    #[arg(long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub output_store: Option<PathBuf>,
}

#[derive(Args)]
pub struct HashAssocArgs {
    /// Presence store to analyze
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    pub store: PathBuf,

    /// Output association matrix (.npy); labels are written to <output>.labels.csv
    #[arg(short = 'o', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub output: PathBuf,

    /// Also write the matrix as a dense CSV
    #[arg(long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub compare_csv: Option<PathBuf>,

    /// Write a categories CSV of the classified hashes
    #[arg(short = 'C', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub categories_csv: Option<PathBuf>,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Args)]
pub struct HashBySampleArgs {
    /// Presence store to analyze
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    pub store: PathBuf,

    /// Output presence CSV (query_name, match_name, presence)
    #[arg(short = 'o', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub output: PathBuf,

    /// Write a categories CSV of the classified hashes
    #[arg(short = 'C', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub categories_csv: Option<PathBuf>,

    /// Also write the dense presence matrix to <output>.matrix.npy
    #[arg(long, help_heading = "Output", default_value_t = false)]
    pub dense: bool,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Args)]
pub struct ClusterArgs {
    /// Presence store to analyze
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    pub store: PathBuf,

    /// Prefix of the per-cluster sketch files (default: the store file name)
    #[arg(long, help_heading = "Output")]
    pub cluster_prefix: Option<String>,

    /// Write the cluster categories CSV
    #[arg(long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub save_categories_csv: Option<PathBuf>,

    /// Add a numeric cluster column to the categories CSV (-1 for unclustered)
    #[arg(long, help_heading = "Output", default_value_t = false, requires = "save_categories_csv")]
    pub with_cluster_column: bool,

    /// Smallest number of hashes forming a cluster
    #[arg(long, help_heading = "Clustering", default_value_t = DEFAULT_MIN_CLUSTER_SIZE, value_parser = validate_min_cluster_size)]
    pub min_cluster_size: usize,

    /// Neighbours used for core distances (default: min cluster size)
    #[arg(long, help_heading = "Clustering", value_parser = validate_min_samples)]
    pub min_samples: Option<usize>,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Args)]
pub struct KeepListArgs {
    /// Gather CSVs, one per sample; the sample name is the file name up to the first '.'
    #[arg(required = true, help_heading = "Inputs", value_parser = clap::value_parser!(PathBuf))]
    pub gather_csvs: Vec<PathBuf>,

    /// Minimum median abundance of a match for the sample to be kept
    #[arg(long, default_value_t = DEFAULT_MIN_ABUND, value_parser = validate_min_abund)]
    pub min_abund: f64,

    /// Output sample list, one name per line
    #[arg(short = 'o', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
    pub output: PathBuf,
}

fn validate_ksize(k: &str) -> Result<u32, String> {
    let k: u32 = k
        .parse()
        .map_err(|_| format!("`{k}` isn't a valid k-mer length"))?;

    if !(1..=255).contains(&k) {
        return Err("k-mer length must be in the range [1, 255]".to_string());
    }

    Ok(k)
}

fn validate_scaled(scaled: &str) -> Result<u64, String> {
    let scaled: u64 = scaled
        .parse()
        .map_err(|_| format!("`{scaled}` isn't a valid scaled value"))?;

    if scaled == 0 {
        return Err("scaled must be at least 1".to_string());
    }

    Ok(scaled)
}

fn validate_min_presence(min_presence: &str) -> Result<usize, String> {
    let min_presence: usize = min_presence
        .parse()
        .map_err(|_| format!("`{min_presence}` isn't a valid sample count"))?;

    if min_presence < 1 {
        return Err("minimum presence must be at least 1".to_string());
    }

    Ok(min_presence)
}

fn validate_min_cluster_size(size: &str) -> Result<usize, String> {
    let size: usize = size
        .parse()
        .map_err(|_| format!("`{size}` isn't a valid cluster size"))?;

    if size < 2 {
        return Err("minimum cluster size must be at least 2".to_string());
    }

    Ok(size)
}

fn validate_min_samples(min_samples: &str) -> Result<usize, String> {
    let min_samples: usize = min_samples
        .parse()
        .map_err(|_| format!("`{min_samples}` isn't a valid neighbour count"))?;

    if min_samples < 1 {
        return Err("min samples must be at least 1".to_string());
    }

    Ok(min_samples)
}

fn validate_min_abund(min_abund: &str) -> Result<f64, String> {
    let min_abund: f64 = min_abund
        .parse()
        .map_err(|_| format!("`{min_abund}` isn't a valid abundance"))?;

    if !min_abund.is_finite() || min_abund < 0.0 {
        return Err("minimum abundance must be a non-negative number".to_string());
    }

    Ok(min_abund)
}

fn validate_rank_list(ranks: &str) -> Result<RankList, String> {
    parse_rank_list(ranks).map(RankList).map_err(|e| e.to_string())
}

fn validate_threads(threads: &str) -> Result<usize, String> {
    let threads: usize = threads
        .parse()
        .map_err(|_| format!("`{threads}` isn't a valid value"))?;

    if !(1..=1024).contains(&threads) {
        return Err("Threads must be in the range [1, 1024]".to_string());
    }

    Ok(threads)
}

fn get_styles() -> clap::builder::Styles {
    let white = Some(anstyle::Color::Ansi(anstyle::AnsiColor::White));
    let green = Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green));
    let red = Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red));

    clap::builder::Styles::styled()
        .usage(anstyle::Style::new().bold().fg_color(white))
        .header(anstyle::Style::new().bold().fg_color(white))
        .literal(anstyle::Style::new().fg_color(green))
        .invalid(anstyle::Style::new().bold().fg_color(red))
        .error(anstyle::Style::new().bold().fg_color(red))
        .valid(anstyle::Style::new().bold().underline().fg_color(green))
        .placeholder(anstyle::Style::new().fg_color(white))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_verify_cli() {
        Cli::command().debug_assert()
    }

    #[test]
    fn test_parse_cluster_command() {
        let cli = Cli::try_parse_from([
            "hashclust",
            "cluster",
            "store.bin",
            "--min-cluster-size",
            "8",
            "--pangenome-types",
            "34",
            "-m",
            "2",
            "-t",
            "4",
        ])
        .unwrap();

        assert_eq!(cli.threads, 4);
        let Command::Cluster(args) = cli.command else {
            panic!("expected cluster command");
        };
        assert_eq!(args.min_cluster_size, 8);
        assert_eq!(args.min_samples, None);
        let params = args.filter.to_params().unwrap();
        assert_eq!(params.min_presence(), 2);
        assert_eq!(
            params.pangenome_types(),
            Some(&[PangenomeRank::Shell, PangenomeRank::InnerCloud][..])
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Cli::try_parse_from(["hashclust", "cluster", "s.bin", "--pangenome-types", "16"]).is_err());
        assert!(Cli::try_parse_from(["hashclust", "cluster", "s.bin", "--min-cluster-size", "1"]).is_err());
        assert!(Cli::try_parse_from(["hashclust", "hash-assoc", "s.bin", "-o", "m.npy", "-m", "0"]).is_err());
        assert!(Cli::try_parse_from(["hashclust", "presence", "a.sig.json", "-o", "s.bin"]).is_err());
    }

    #[test]
    fn test_parse_keep_list_and_min_samples() {
        let cli = Cli::try_parse_from(["hashclust", "keep-list", "a.gather.csv", "-o", "keep.txt"]).unwrap();
        let Command::KeepList(args) = cli.command else {
            panic!("expected keep-list command");
        };
        assert_eq!(args.min_abund, DEFAULT_MIN_ABUND);

        let cli = Cli::try_parse_from(["hashclust", "cluster", "s.bin", "--min-samples", "3"]).unwrap();
        let Command::Cluster(args) = cli.command else {
            panic!("expected cluster command");
        };
        assert_eq!(args.min_samples, Some(3));

        assert!(Cli::try_parse_from(["hashclust", "cluster", "s.bin", "--min-samples", "0"]).is_err());
        assert!(Cli::try_parse_from(["hashclust", "keep-list", "a.csv", "-o", "k.txt", "--min-abund", "-1"]).is_err());
    }

    #[test]
    fn test_presence_defaults() {
        let cli = Cli::try_parse_from([
            "hashclust",
            "presence",
            "a.sig.json",
            "b.sig.json",
            "--ranktable",
            "ranks.csv",
            "-o",
            "s.bin",
        ])
        .unwrap();

        let Command::Presence(args) = cli.command else {
            panic!("expected presence command");
        };
        assert_eq!(args.sketches.len(), 2);
        assert_eq!(args.ksize, DEFAULT_KSIZE);
        assert_eq!(args.scaled, DEFAULT_SCALED);
    }
}
