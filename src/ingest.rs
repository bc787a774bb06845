
//! Build a presence store by scanning sample sketches for the hashes of a reference query.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use itertools::Itertools;
use serde::Deserialize;

use crate::classify::PangenomeRank;
use crate::error::{Error, Result};
use crate::presence::{CategoryMap, PresenceMap, PresenceStore};
use crate::sketch::{DNA, FracMinHash, ItemHash, SampleSketch, ScaledSketch, load_sketch_file};

pub const DEFAULT_SCALED: u64 = 100_000;
pub const DEFAULT_KSIZE: u32 = 21;
pub const DEFAULT_MIN_ABUND: f64 = 5.0;

#[derive(Debug, Deserialize)]
struct RanktableRow {
    hashval: ItemHash,
    pangenome_classification: i64,
}

/// Read a `hashval,pangenome_classification` ranktable.
pub fn read_ranktable_csv(path: &Path) -> anyhow::Result<CategoryMap> {
    let mut reader = csv::Reader::from_path(path)
        .context(format!("Failed to open ranktable {}", path.display()))?;

    let mut categories = CategoryMap::new();
    for (row_idx, row) in reader.deserialize::<RanktableRow>().enumerate() {
        let row = row.context(format!("Invalid ranktable row {} in {}", row_idx + 1, path.display()))?;
        let rank = PangenomeRank::from_rank(row.pangenome_classification)
            .context(format!("Invalid rank for hash {}", row.hashval))?;
        categories.insert(row.hashval, rank);
    }

    Ok(categories)
}

/// Read the hashes of a source sketch with the given k-mer size.
pub fn read_source_sketch(path: &Path, ksize: u32) -> anyhow::Result<FracMinHash> {
    let records = load_sketch_file(path)?;
    let Some(record) = records.into_iter().find(|r| r.ksize == ksize) else {
        bail!("No sketch with k={} in {}", ksize, path.display());
    };

    Ok(record.into_sample()?.minhash)
}

/// Read sample names, one per line; blank lines are ignored.
pub fn read_sample_filter(path: &Path) -> anyhow::Result<BTreeSet<String>> {
    let file = File::open(path).context(format!("Failed to open {}", path.display()))?;

    let mut names = BTreeSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let name = line.trim();
        if !name.is_empty() {
            names.insert(name.to_string());
        }
    }

    Ok(names)
}

#[derive(Debug, Deserialize)]
struct GatherRow {
    median_abund: Option<f64>,
}

/// Sample name of a gather CSV: its file name up to the first `.`.
fn gather_sample_name(path: &Path) -> anyhow::Result<String> {
    let file_name = path
        .file_name()
        .context(format!("Gather path {} has no file name", path.display()))?
        .to_string_lossy();

    Ok(file_name.split('.').next().unwrap_or_default().to_string())
}

/// Names of samples whose gather CSV has a match with `median_abund >= min_abund`.
/// Rows with an empty `median_abund` are ignored. Names keep the order of `paths`.
pub fn read_gather_keep_list(paths: &[PathBuf], min_abund: f64) -> anyhow::Result<Vec<String>> {
    let mut keep = Vec::new();
    for path in paths {
        let mut reader = csv::Reader::from_path(path)
            .context(format!("Failed to open gather CSV {}", path.display()))?;

        for row in reader.deserialize::<GatherRow>() {
            let row = row.context(format!("Invalid row in {}", path.display()))?;
            if row.median_abund.is_some_and(|abund| abund >= min_abund) {
                keep.push(gather_sample_name(path)?);
                break;
            }
        }
    }

    Ok(keep.into_iter().unique().collect())
}

/// Mutable accumulator of presence sets, finalized into an immutable [`PresenceStore`].
#[derive(Debug)]
pub struct PresenceStoreBuilder {
    query: FracMinHash,
    categories: CategoryMap,
    presence_of: PresenceMap,
    included: Vec<String>,
}

impl PresenceStoreBuilder {
    /// Start a store for `query_hashes` at the given resolution. Query hashes failing
    /// the resolution test are dropped.
    pub fn new<I>(ksize: u32, scaled: u64, query_hashes: I, categories: CategoryMap) -> Result<Self>
    where
        I: IntoIterator<Item = ItemHash>,
    {
        if ksize == 0 {
            return Err(Error::InvalidParameter {
                name: "ksize",
                message: "must be at least 1".to_string(),
            });
        }

        if scaled == 0 {
            return Err(Error::InvalidParameter {
                name: "scaled",
                message: "must be at least 1".to_string(),
            });
        }

        let mut query = FracMinHash::new(ksize, scaled);
        query.add_many(query_hashes);

        Ok(PresenceStoreBuilder {
            query,
            categories,
            presence_of: PresenceMap::new(),
            included: Vec::new(),
        })
    }

    pub fn query(&self) -> &FracMinHash {
        &self.query
    }

    /// Names of samples that contained at least one query hash, in scan order.
    pub fn included_samples(&self) -> &[String] {
        &self.included
    }

    /// Record which query hashes a sample contains. Returns false if it shares none.
    pub fn add_sample(&mut self, sample: &SampleSketch) -> Result<bool> {
        if sample.minhash.ksize() != self.query.ksize() {
            return Err(Error::IncompatibleSketch {
                name: sample.name.clone(),
                reason: format!(
                    "k-mer size {} does not match {}",
                    sample.minhash.ksize(),
                    self.query.ksize()
                ),
            });
        }

        if sample.minhash.scaled() > self.query.scaled() {
            return Err(Error::IncompatibleSketch {
                name: sample.name.clone(),
                reason: format!(
                    "scaled={} is coarser than the target scaled={}",
                    sample.minhash.scaled(),
                    self.query.scaled()
                ),
            });
        }

        let sample_hashes = sample.minhash.downsample(self.query.scaled())?;
        if self.query.containment_in(&sample_hashes) == 0.0 {
            return Ok(false);
        }

        for hash in self.query.hashes().intersection(sample_hashes.hashes()) {
            self.presence_of
                .entry(*hash)
                .or_default()
                .insert(sample.name.clone());
        }
        self.included.push(sample.name.clone());

        Ok(true)
    }

    /// Finalize the store. Categories are kept only for hashes seen in some sample.
    pub fn finish(self) -> Result<PresenceStore> {
        let presence_of = self.presence_of;
        let category_of = self
            .categories
            .into_iter()
            .filter(|(hash, _)| presence_of.contains_key(hash))
            .collect();

        PresenceStore::new(
            self.query.ksize(),
            self.query.scaled(),
            DNA,
            category_of,
            presence_of,
        )
    }
}
