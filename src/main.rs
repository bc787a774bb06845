
//! Main entry point for hashclust.
//!
//! Parses the command line, sets up logging and the thread pool, then runs one
//! subcommand: building a presence store from sample sketches, classifying its hashes
//! by prevalence, exporting association and presence matrices, clustering hashes, or
//! listing the samples worth scanning from their gather results.

use std::env;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use itertools::Itertools;
use log::{debug, info, warn};
use num_format::{Locale, ToFormattedString};

use crate::association::{build_association_matrix_verbose, build_presence_matrix};
use crate::classify::{category_counts, classify, max_presence};
use crate::cli::{
    ClassifyArgs, Cli, ClusterArgs, Command, FilterArgs, HashAssocArgs, HashBySampleArgs, KeepListArgs,
    PresenceArgs,
};
use crate::cluster::cluster_hashes;
use crate::export::{
    dense_matrix_path, labels_path, write_categories_csv, write_cluster_categories_csv,
    write_cluster_sketches, write_compare_csv, write_labels_csv, write_npy_matrix,
    write_name_list, write_presence_csv, write_presence_matrix, write_ranktable_csv,
    write_sample_categories_csv,
};
use crate::ingest::{
    PresenceStoreBuilder, read_gather_keep_list, read_ranktable_csv, read_sample_filter, read_source_sketch,
};
use crate::logging::{level_for, setup_logger};
use crate::presence::{CategoryMap, PresenceStore};
use crate::progress::progress_bar_msg;
use crate::sketch::{ScaledSketch, load_sketch_file};

mod cli;
pub mod association;
pub mod classify;
pub mod cluster;
pub mod error;
pub mod export;
pub mod filter;
pub mod hdbscan;
pub mod ingest;
pub mod logging;
pub mod presence;
pub mod progress;
pub mod sketch;

/// Number of cluster sizes reported in the log.
const REPORTED_CLUSTERS: usize = 10;

/// Common initialization required by all commands.
fn init(threads: usize) -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    info!("{} v{}", env!("CARGO_PKG_NAME"), VERSION);
    info!("{}", env::args().collect::<Vec<String>>().join(" "));

    info!("Using {} threads.", threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;

    Ok(())
}

fn fmt_count(n: usize) -> String {
    n.to_formatted_string(&Locale::en)
}

/// Load a store and apply the shared filter options.
fn load_filtered_store(path: &Path, filter: &FilterArgs) -> Result<PresenceStore> {
    let params = filter.to_params()?;

    info!("Loading presence store: {}", path.display());
    let store = PresenceStore::load_from_file(path)?;
    info!(
        "Loaded {} hashes across {} samples ({}, k={}, scaled={}).",
        fmt_count(store.len()),
        fmt_count(store.samples().len()),
        store.molecule_type(),
        store.k_size(),
        store.scaled().to_formatted_string(&Locale::en)
    );

    let store = params.apply(&store)?;
    if store.is_empty() {
        warn!("No hashes left after filtering.");
    }

    Ok(store)
}

fn run_presence(args: &PresenceArgs) -> Result<()> {
    let (query_hashes, categories) = if let Some(ranktable) = &args.ranktable {
        info!("Reading reference hashes from ranktable: {}", ranktable.display());
        let categories = read_ranktable_csv(ranktable)?;
        (categories.keys().copied().collect::<Vec<_>>(), categories)
    } else if let Some(source) = &args.source_sketch {
        info!("Reading reference hashes from sketch: {}", source.display());
        let sketch = read_source_sketch(source, args.ksize)?;
        if sketch.scaled() > args.scaled {
            bail!(
                "Source sketch has scaled={}, which is coarser than the requested scaled={}",
                sketch.scaled(),
                args.scaled
            );
        }
        (sketch.hashes().iter().copied().collect(), CategoryMap::new())
    } else {
        bail!("No reference specified. Use --ranktable or --source-sketch.");
    };

    let mut builder = PresenceStoreBuilder::new(args.ksize, args.scaled, query_hashes, categories)?;
    info!(
        "Reference query has {} hashes at scaled={}.",
        fmt_count(builder.query().len()),
        args.scaled.to_formatted_string(&Locale::en)
    );
    debug!("Max hash retained at scaled={}: {}", args.scaled, builder.query().max_hash());
    if builder.query().is_empty() {
        warn!("No reference hashes pass the resolution test; the store will be empty.");
    }

    let keep_samples = match &args.filter_samples {
        Some(path) => {
            let names = read_sample_filter(path)?;
            info!("Restricting to {} listed samples.", fmt_count(names.len()));
            Some(names)
        }
        None => None,
    };

    let (mut n_scanned, mut n_wrong_k, mut n_filtered) = (0usize, 0usize, 0usize);
    let progress_bar = progress_bar_msg(args.sketches.len() as u64, "files");
    for path in &args.sketches {
        progress_bar.set_message(path.display().to_string());
        for record in load_sketch_file(path)? {
            if record.ksize != args.ksize {
                n_wrong_k += 1;
                continue;
            }

            if keep_samples.as_ref().is_some_and(|names| !names.contains(&record.name)) {
                n_filtered += 1;
                continue;
            }

            let sample = record.into_sample().context(format!("Invalid sketch in {}", path.display()))?;
            if !builder.add_sample(&sample)? {
                debug!("Sample '{}' shares no reference hashes.", sample.name);
            }
            n_scanned += 1;
        }
        progress_bar.inc(1);
    }
    progress_bar.finish();

    info!(
        "Scanned {} samples; {} contain reference hashes.",
        fmt_count(n_scanned),
        fmt_count(builder.included_samples().len())
    );
    if n_wrong_k > 0 {
        info!("Skipped {} sketches with k != {}.", fmt_count(n_wrong_k), args.ksize);
    }
    if n_filtered > 0 {
        info!("Skipped {} samples not in the sample filter.", fmt_count(n_filtered));
    }

    if let Some(category_out) = &args.category_out {
        write_sample_categories_csv(category_out, builder.included_samples())?;
        info!("Wrote sample categories to {}", category_out.display());
    }

    let store = builder.finish()?;
    info!(
        "Presence store has {} hashes ({} classified).",
        fmt_count(store.len()),
        fmt_count(store.categories().len())
    );
    store.save_to_file(&args.output)?;
    info!("Saved presence store to {}", args.output.display());

    Ok(())
}

fn run_classify(args: &ClassifyArgs) -> Result<()> {
    let store = PresenceStore::load_from_file(&args.store)?;
    info!("Loaded {} hashes from {}", fmt_count(store.len()), args.store.display());

    let categories = classify(&store);
    info!("Maximum presence is {} samples.", fmt_count(max_presence(&store)));
    for (rank, count) in category_counts(&categories) {
        info!(" - {} ({}): {} hashes", rank, rank.rank(), fmt_count(count));
    }

    write_ranktable_csv(&args.output, &categories)?;
    info!("Wrote ranktable to {}", args.output.display());

    if let Some(output_store) = &args.output_store {
        store.with_categories(categories)?.save_to_file(output_store)?;
        info!("Saved classified presence store to {}", output_store.display());
    }

    Ok(())
}

fn run_hash_assoc(args: &HashAssocArgs) -> Result<()> {
    let store = load_filtered_store(&args.store, &args.filter)?;

    info!("Building {0} x {0} association matrix.", fmt_count(store.len()));
    let matrix = build_association_matrix_verbose(&store)?;

    write_npy_matrix(&args.output, &matrix.similarity)?;
    info!("Wrote association matrix to {}", args.output.display());

    let labels = labels_path(&args.output);
    write_labels_csv(&labels, &matrix, &store)?;
    info!("Wrote labels to {}", labels.display());

    if let Some(compare_csv) = &args.compare_csv {
        write_compare_csv(compare_csv, &matrix)?;
        info!("Wrote association matrix CSV to {}", compare_csv.display());
    }

    if let Some(categories_csv) = &args.categories_csv {
        let n = write_categories_csv(categories_csv, matrix.hashes.iter().copied(), &store)?;
        info!("Wrote {} hash categories to {}", fmt_count(n), categories_csv.display());
    }

    Ok(())
}

fn run_hash_by_sample(args: &HashBySampleArgs) -> Result<()> {
    let store = load_filtered_store(&args.store, &args.filter)?;

    let n = write_presence_csv(&args.output, &store)?;
    info!("Wrote {} presence rows to {}", fmt_count(n), args.output.display());

    if let Some(categories_csv) = &args.categories_csv {
        let n = write_categories_csv(categories_csv, store.hashes(), &store)?;
        info!("Wrote {} hash categories to {}", fmt_count(n), categories_csv.display());
    }

    if args.dense {
        let matrix = build_presence_matrix(&store);
        let path = dense_matrix_path(&args.output);
        write_presence_matrix(&path, &matrix)?;
        info!(
            "Wrote {} x {} presence matrix to {}",
            fmt_count(matrix.samples.len()),
            fmt_count(matrix.hashes.len()),
            path.display()
        );
    }

    Ok(())
}

/// File name of the store, so cluster sketches land in the working directory.
fn default_cluster_prefix(store: &Path) -> Result<String> {
    let name = store
        .file_name()
        .context(format!("Store path {} has no file name", store.display()))?;
    Ok(name.to_string_lossy().to_string())
}

fn run_keep_list(args: &KeepListArgs) -> Result<()> {
    let names = read_gather_keep_list(&args.gather_csvs, args.min_abund)?;
    info!(
        "{} of {} gather files have a match with median_abund >= {}.",
        fmt_count(names.len()),
        fmt_count(args.gather_csvs.len()),
        args.min_abund
    );

    write_name_list(&args.output, &names)?;
    info!("Wrote sample keep-list to {}", args.output.display());

    Ok(())
}

fn run_cluster(args: &ClusterArgs) -> Result<()> {
    let store = load_filtered_store(&args.store, &args.filter)?;

    info!("Building {0} x {0} association matrix.", fmt_count(store.len()));
    let matrix = build_association_matrix_verbose(&store)?;

    info!(
        "Clustering {} hashes with min_cluster_size={}.",
        fmt_count(matrix.len()),
        args.min_cluster_size
    );
    let assignment = cluster_hashes(&matrix, args.min_cluster_size, args.min_samples)?;
    info!(
        "Found {} clusters; {} hashes unclustered.",
        fmt_count(assignment.num_clusters()),
        fmt_count(assignment.unclustered.len())
    );
    if assignment.num_clusters() > 0 {
        info!(
            "Largest cluster sizes: {}",
            assignment
                .clusters
                .iter()
                .take(REPORTED_CLUSTERS)
                .map(|members| fmt_count(members.len()))
                .join(", ")
        );
    }

    let prefix = match &args.cluster_prefix {
        Some(prefix) => prefix.clone(),
        None => default_cluster_prefix(&args.store)?,
    };
    let paths = write_cluster_sketches(&prefix, &assignment, &store)?;
    info!("Wrote {} cluster sketches with prefix {}", fmt_count(paths.len()), prefix);

    if let Some(categories_csv) = &args.save_categories_csv {
        write_cluster_categories_csv(categories_csv, &assignment, args.with_cluster_column)?;
        info!("Wrote cluster categories to {}", categories_csv.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let start = Instant::now();

    let args = Cli::parse();

    setup_logger(args.log_file.as_deref(), level_for(args.verbose))?;

    init(args.threads)?;

    match &args.command {
        Command::Presence(cmd) => run_presence(cmd)?,
        Command::Classify(cmd) => run_classify(cmd)?,
        Command::HashAssoc(cmd) => run_hash_assoc(cmd)?,
        Command::HashBySample(cmd) => run_hash_by_sample(cmd)?,
        Command::Cluster(cmd) => run_cluster(cmd)?,
        Command::KeepList(cmd) => run_keep_list(cmd)?,
    }

    info!("Elapsed time (sec): {:.2}", start.elapsed().as_secs_f32());
    info!("Done.");

    Ok(())
}
