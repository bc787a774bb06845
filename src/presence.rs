
//! The hash presence store: for each hash, the set of samples it was observed in,
//! plus an optional prevalence category per hash.
//!
//! Stores are never mutated after construction. Downsampling and filtering return
//! new stores. A store serializes to a single tagged bincode blob which is validated
//! again on load.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::Context;
use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::classify::PangenomeRank;
use crate::error::{Error, Result};
use crate::export::write_atomically;
use crate::sketch::{DNA, FracMinHash, ItemHash, ScaledSketch, max_hash_for_scaled};

pub type SampleSet = BTreeSet<String>;
pub type CategoryMap = BTreeMap<ItemHash, PangenomeRank>;
pub type PresenceMap = BTreeMap<ItemHash, SampleSet>;

const STORE_TYPE_TAG: &str = "HashPresenceStore";
const STORE_FORMAT_VERSION: u32 = 1;

static NO_SAMPLES: SampleSet = BTreeSet::new();

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStore {
    k_size: u32,
    scaled: u64,
    molecule_type: String,
    category_of: CategoryMap,
    presence_of: PresenceMap,
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

impl PresenceStore {
    /// Create a store, checking every store invariant.
    pub fn new(
        k_size: u32,
        scaled: u64,
        molecule_type: &str,
        category_of: CategoryMap,
        presence_of: PresenceMap,
    ) -> Result<Self> {
        let store = PresenceStore {
            k_size,
            scaled,
            molecule_type: molecule_type.to_string(),
            category_of,
            presence_of,
        };
        store.validate()?;
        Ok(store)
    }

    fn validate(&self) -> Result<()> {
        if self.k_size == 0 {
            return Err(Error::InconsistentData("k-mer size must be positive".to_string()));
        }

        if self.scaled == 0 {
            return Err(Error::InconsistentData("scaled must be positive".to_string()));
        }

        if self.molecule_type != DNA {
            return Err(Error::InconsistentData(format!(
                "unsupported molecule type '{}'",
                self.molecule_type
            )));
        }

        let max_hash = max_hash_for_scaled(self.scaled);
        if let Some(hash) = self.presence_of.keys().find(|h| **h > max_hash) {
            return Err(Error::InconsistentData(format!(
                "hash {hash} is above the max hash {max_hash} for scaled={}",
                self.scaled
            )));
        }

        if let Some((hash, _)) = self.presence_of.iter().find(|(_, samples)| samples.is_empty()) {
            return Err(Error::EmptyPresence(*hash));
        }

        if let Some(hash) = self.category_of.keys().find(|h| !self.presence_of.contains_key(h)) {
            return Err(Error::InconsistentData(format!(
                "category assigned to hash {hash} which has no presence entry"
            )));
        }

        Ok(())
    }

    pub fn k_size(&self) -> u32 {
        self.k_size
    }

    pub fn scaled(&self) -> u64 {
        self.scaled
    }

    pub fn molecule_type(&self) -> &str {
        &self.molecule_type
    }

    /// Prevalence category of a hash, if it has been classified.
    pub fn category_of(&self, hash: ItemHash) -> Option<PangenomeRank> {
        self.category_of.get(&hash).copied()
    }

    /// Samples observing a hash; empty if the hash is not in the store.
    pub fn presence_of(&self, hash: ItemHash) -> &SampleSet {
        self.presence_of.get(&hash).unwrap_or(&NO_SAMPLES)
    }

    pub fn categories(&self) -> &CategoryMap {
        &self.category_of
    }

    pub fn presence(&self) -> &PresenceMap {
        &self.presence_of
    }

    /// Hashes in ascending order.
    pub fn hashes(&self) -> impl Iterator<Item = ItemHash> + '_ {
        self.presence_of.keys().copied()
    }

    /// Distinct sample names, sorted.
    pub fn samples(&self) -> BTreeSet<&str> {
        self.presence_of
            .values()
            .flat_map(|samples| samples.iter().map(|s| s.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.presence_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presence_of.is_empty()
    }

    /// Keep the hashes matching `keep`, carrying categories over for survivors.
    fn retain(&self, scaled: u64, keep: impl Fn(ItemHash, &SampleSet) -> bool) -> Self {
        let presence_of: PresenceMap = self
            .presence_of
            .iter()
            .filter(|(hash, samples)| keep(**hash, *samples))
            .map(|(hash, samples)| (*hash, samples.clone()))
            .collect();

        let category_of = self
            .category_of
            .iter()
            .filter(|(hash, _)| presence_of.contains_key(hash))
            .map(|(hash, rank)| (*hash, *rank))
            .collect();

        PresenceStore {
            k_size: self.k_size,
            scaled,
            molecule_type: self.molecule_type.clone(),
            category_of,
            presence_of,
        }
    }

    /// Downsample to a coarser resolution.
    ///
    /// Only hashes already retained at the current resolution are re-tested, so the
    /// result is a subset of a store built directly at `new_scaled`.
    pub fn downsample(&self, new_scaled: u64) -> Result<Self> {
        if new_scaled < self.scaled {
            return Err(Error::InvalidResolution {
                current: self.scaled,
                requested: new_scaled,
            });
        }

        self.downsample_with(FracMinHash::new(self.k_size, new_scaled))
    }

    /// Downsample using any resolution-aware sketch as the acceptance test.
    pub fn downsample_with<S: ScaledSketch>(&self, mut sketch: S) -> Result<Self> {
        if sketch.scaled() < self.scaled {
            return Err(Error::InvalidResolution {
                current: self.scaled,
                requested: sketch.scaled(),
            });
        }

        sketch.add_many(self.hashes());
        let retained = sketch.hashes();
        Ok(self.retain(sketch.scaled(), |hash, _| retained.contains(&hash)))
    }

    /// Keep only hashes observed in at least `min_count` samples.
    pub fn filter_by_min_presence(&self, min_count: usize) -> Result<Self> {
        if min_count < 1 {
            return Err(Error::InvalidParameter {
                name: "min_presence",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(self.retain(self.scaled, |_, samples| samples.len() >= min_count))
    }

    /// Keep only hashes whose category is one of `allowed`; unclassified hashes are dropped.
    pub fn filter_by_category(&self, allowed: &[PangenomeRank]) -> Result<Self> {
        if allowed.is_empty() {
            return Err(Error::EmptyRankList);
        }

        Ok(self.retain(self.scaled, |hash, _| {
            self.category_of
                .get(&hash)
                .is_some_and(|rank| allowed.contains(rank))
        }))
    }

    /// Copy of this store with its categories replaced.
    pub fn with_categories(&self, category_of: CategoryMap) -> Result<Self> {
        PresenceStore::new(
            self.k_size,
            self.scaled,
            &self.molecule_type,
            category_of,
            self.presence_of.clone(),
        )
    }

    /// Encode the store as an opaque, tagged blob.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode_options()
            .serialize(&(STORE_TYPE_TAG, STORE_FORMAT_VERSION, self))
            .map_err(|e| Error::CorruptStore(format!("failed to encode store: {e}")))
    }

    /// Decode a blob produced by [`PresenceStore::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (tag, version, store): (String, u32, PresenceStore) = bincode_options()
            .deserialize(bytes)
            .map_err(|e| Error::CorruptStore(e.to_string()))?;

        if tag != STORE_TYPE_TAG {
            return Err(Error::CorruptStore(format!(
                "expected object of type '{STORE_TYPE_TAG}', found '{tag}'"
            )));
        }

        if version != STORE_FORMAT_VERSION {
            return Err(Error::CorruptStore(format!(
                "unsupported store format version {version}"
            )));
        }

        store.validate()?;
        Ok(store)
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = self.serialize()?;
        write_atomically(path, |writer| Ok(writer.write_all(&bytes)?))
            .context(format!("Failed to save presence store to {}", path.display()))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).context(format!("Failed to read {}", path.display()))?;
        let store = PresenceStore::deserialize(&bytes)
            .context(format!("Failed to load presence store from {}", path.display()))?;
        Ok(store)
    }
}
