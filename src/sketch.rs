
//! FracMinHash sketches of k-mer hashes and their JSON file format.
//!
//! A FracMinHash sketch keeps every hash at or below `u64::MAX / scaled`, so a larger
//! scale factor retains fewer hashes. Downsampling to a larger scale re-applies the
//! same test to the hashes already retained; a sketch can never be refined to a
//! smaller scale since the discarded hashes were never recorded.
//!
//! See Hera et al., 2024: https://www.biorxiv.org/content/10.1101/2023.11.06.565843v3

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type ItemHash = u64;

pub const DNA: &str = "DNA";

/// Largest hash retained by a sketch with the given scale factor.
pub fn max_hash_for_scaled(scaled: u64) -> ItemHash {
    ItemHash::MAX / scaled.max(1)
}

/// Capability shared by resolution-aware sketches.
pub trait ScaledSketch {
    fn ksize(&self) -> u32;

    fn scaled(&self) -> u64;

    /// Return true if a hash survives this sketch's resolution test.
    fn accepts(&self, hash: ItemHash) -> bool;

    /// Add a hash, returning false if the resolution test rejected it.
    fn add_hash(&mut self, hash: ItemHash) -> bool;

    /// Retained hashes in ascending order.
    fn hashes(&self) -> &BTreeSet<ItemHash>;

    fn add_many<I: IntoIterator<Item = ItemHash>>(&mut self, hashes: I)
    where
        Self: Sized,
    {
        for hash in hashes {
            self.add_hash(hash);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FracMinHash {
    hashes: BTreeSet<ItemHash>,
    ksize: u32,
    scaled: u64,
    max_hash: ItemHash,
}

impl FracMinHash {
    pub fn new(ksize: u32, scaled: u64) -> Self {
        FracMinHash {
            hashes: BTreeSet::new(),
            ksize,
            scaled,
            max_hash: max_hash_for_scaled(scaled),
        }
    }

    /// Create an empty sketch with the same parameters.
    pub fn copy_and_clear(&self) -> Self {
        FracMinHash::new(self.ksize, self.scaled)
    }

    /// Downsample to a coarser scale factor.
    pub fn downsample(&self, new_scaled: u64) -> Result<Self> {
        if new_scaled < self.scaled {
            return Err(Error::InvalidResolution {
                current: self.scaled,
                requested: new_scaled,
            });
        }

        let mut sketch = FracMinHash::new(self.ksize, new_scaled);
        sketch.add_many(self.hashes.iter().copied());
        Ok(sketch)
    }

    /// Fraction of this sketch's hashes that are also in `other`.
    pub fn containment_in(&self, other: &FracMinHash) -> f64 {
        if self.hashes.is_empty() {
            return 0.0;
        }

        let shared = self.hashes.intersection(&other.hashes).count();
        shared as f64 / self.hashes.len() as f64
    }

    pub fn max_hash(&self) -> ItemHash {
        self.max_hash
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl ScaledSketch for FracMinHash {
    fn ksize(&self) -> u32 {
        self.ksize
    }

    fn scaled(&self) -> u64 {
        self.scaled
    }

    #[inline]
    fn accepts(&self, hash: ItemHash) -> bool {
        hash <= self.max_hash
    }

    fn add_hash(&mut self, hash: ItemHash) -> bool {
        if self.accepts(hash) {
            self.hashes.insert(hash);
            true
        } else {
            false
        }
    }

    fn hashes(&self) -> &BTreeSet<ItemHash> {
        &self.hashes
    }
}

/// A named sample sketch.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleSketch {
    pub name: String,
    pub minhash: FracMinHash,
}

/// On-disk representation of a single sketch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SketchRecord {
    pub name: String,
    pub ksize: u32,
    pub scaled: u64,
    pub molecule: String,
    pub hashes: Vec<ItemHash>,
}

impl SketchRecord {
    pub fn from_sketch(name: &str, sketch: &FracMinHash) -> Self {
        SketchRecord {
            name: name.to_string(),
            ksize: sketch.ksize(),
            scaled: sketch.scaled(),
            molecule: DNA.to_string(),
            hashes: sketch.hashes().iter().copied().collect(),
        }
    }

    /// Build the in-memory sketch, dropping hashes above the record's max hash.
    pub fn into_sample(self) -> anyhow::Result<SampleSketch> {
        if self.scaled == 0 {
            bail!("Sketch '{}' has scaled = 0", self.name);
        }

        if self.molecule.to_uppercase() != DNA {
            bail!(
                "Sketch '{}' has molecule type '{}'; only {} is supported",
                self.name,
                self.molecule,
                DNA
            );
        }

        let mut minhash = FracMinHash::new(self.ksize, self.scaled);
        minhash.add_many(self.hashes);
        Ok(SampleSketch {
            name: self.name,
            minhash,
        })
    }
}

/// Read all sketch records from a JSON sketch file.
pub fn load_sketch_file(path: &Path) -> anyhow::Result<Vec<SketchRecord>> {
    let reader = File::open(path)
        .map(BufReader::new)
        .context(format!("Failed to open {}", path.display()))?;

    let records: Vec<SketchRecord> = serde_json::from_reader(reader)
        .context(format!("Failed to parse sketch file {}", path.display()))?;

    Ok(records)
}

/// Write sketch records as a JSON array.
pub fn write_sketch_records<W: Write>(writer: W, records: &[SketchRecord]) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(writer, records)?;
    Ok(())
}
