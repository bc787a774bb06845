
//! This module defines the `FilterParams` struct, which bundles the resolution and
//! filtering parameters shared by all analysis commands: an optional coarser scale
//! factor, the minimum number of samples a hash must be present in, and an optional
//! list of pangenome ranks to keep. Parameters are validated on construction so that
//! misconfiguration is reported before any computation starts.

use itertools::Itertools;
use log::info;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

use crate::classify::PangenomeRank;
use crate::error::{Error, Result};
use crate::presence::PresenceStore;

pub const DEFAULT_MIN_PRESENCE: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    scaled: Option<u64>,
    min_presence: usize,
    pangenome_types: Option<Vec<PangenomeRank>>,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            scaled: None,
            min_presence: DEFAULT_MIN_PRESENCE,
            pangenome_types: None,
        }
    }
}

impl FilterParams {
    pub fn new(
        scaled: Option<u64>,
        min_presence: usize,
        pangenome_types: Option<Vec<PangenomeRank>>,
    ) -> Result<Self> {
        if scaled == Some(0) {
            return Err(Error::InvalidParameter {
                name: "scaled",
                message: "must be at least 1".to_string(),
            });
        }

        if min_presence < 1 {
            return Err(Error::InvalidParameter {
                name: "min_presence",
                message: "must be at least 1".to_string(),
            });
        }

        if pangenome_types.as_ref().is_some_and(|ranks| ranks.is_empty()) {
            return Err(Error::EmptyRankList);
        }

        Ok(FilterParams {
            scaled,
            min_presence,
            pangenome_types,
        })
    }

    pub fn scaled(&self) -> Option<u64> {
        self.scaled
    }

    pub fn min_presence(&self) -> usize {
        self.min_presence
    }

    pub fn pangenome_types(&self) -> Option<&[PangenomeRank]> {
        self.pangenome_types.as_deref()
    }

    /// Check the requested resolution against a loaded store before filtering.
    pub fn check_compatibility(&self, store: &PresenceStore) -> Result<()> {
        match self.scaled {
            Some(scaled) if scaled < store.scaled() => Err(Error::InvalidResolution {
                current: store.scaled(),
                requested: scaled,
            }),
            _ => Ok(()),
        }
    }

    /// Downsample, then filter by presence, then by pangenome rank.
    pub fn apply(&self, store: &PresenceStore) -> Result<PresenceStore> {
        self.check_compatibility(store)?;

        let mut store = store.clone();

        if let Some(scaled) = self.scaled {
            store = store.downsample(scaled)?;
            info!(
                "Downsampled to scaled={}; {} hashes left.",
                store.scaled().to_formatted_string(&Locale::en),
                store.len().to_formatted_string(&Locale::en)
            );
        }

        if self.min_presence > 1 {
            store = store.filter_by_min_presence(self.min_presence)?;
            info!(
                "Filtered to min_presence={}; {} hashes left.",
                self.min_presence,
                store.len().to_formatted_string(&Locale::en)
            );
        }

        if let Some(ranks) = &self.pangenome_types {
            store = store.filter_by_category(ranks)?;
            info!(
                "Filtered to pangenome types [{}]; {} hashes left.",
                ranks.iter().map(|r| r.rank()).join(", "),
                store.len().to_formatted_string(&Locale::en)
            );
        }

        Ok(store)
    }
}

/// Parse ranks given as a digit string such as `"123"`.
pub fn parse_rank_list(ranks: &str) -> Result<Vec<PangenomeRank>> {
    let ranks = ranks.trim();
    if ranks.is_empty() {
        return Err(Error::EmptyRankList);
    }

    ranks
        .chars()
        .map(|c| match c.to_digit(10) {
            Some(d) => PangenomeRank::from_rank(d as i64),
            None => Err(Error::InvalidParameter {
                name: "pangenome_types",
                message: format!("`{c}` is not a rank digit"),
            }),
        })
        .collect::<Result<Vec<_>>>()
        .map(|ranks| ranks.into_iter().unique().collect())
}
