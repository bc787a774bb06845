
//! Pangenome prevalence categories and the classifier that assigns them.
//!
//! A hash's prevalence fraction is its sample count divided by the largest sample
//! count of any hash in the store. Categories are assigned by descending thresholds,
//! first match wins.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::presence::PresenceStore;
use crate::sketch::ItemHash;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PangenomeRank {
    CentralCore = 1,
    ExternalCore = 2,
    Shell = 3,
    InnerCloud = 4,
    SurfaceCloud = 5,
}

/// Minimum prevalence fraction for each category, in evaluation order.
pub const THRESHOLDS: [(f64, PangenomeRank); 5] = [
    (0.95, PangenomeRank::CentralCore),
    (0.90, PangenomeRank::ExternalCore),
    (0.10, PangenomeRank::Shell),
    (0.01, PangenomeRank::InnerCloud),
    (0.00, PangenomeRank::SurfaceCloud),
];

impl PangenomeRank {
    pub const ALL: [PangenomeRank; 5] = [
        PangenomeRank::CentralCore,
        PangenomeRank::ExternalCore,
        PangenomeRank::Shell,
        PangenomeRank::InnerCloud,
        PangenomeRank::SurfaceCloud,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PangenomeRank::CentralCore => "central core",
            PangenomeRank::ExternalCore => "external core",
            PangenomeRank::Shell => "shell",
            PangenomeRank::InnerCloud => "inner cloud",
            PangenomeRank::SurfaceCloud => "surface cloud",
        }
    }

    pub fn from_rank(rank: i64) -> Result<Self> {
        match rank {
            1 => Ok(PangenomeRank::CentralCore),
            2 => Ok(PangenomeRank::ExternalCore),
            3 => Ok(PangenomeRank::Shell),
            4 => Ok(PangenomeRank::InnerCloud),
            5 => Ok(PangenomeRank::SurfaceCloud),
            _ => Err(Error::InvalidRank(rank)),
        }
    }
}

impl fmt::Display for PangenomeRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Category for a given prevalence fraction.
pub fn rank_for_fraction(f_present: f64) -> PangenomeRank {
    for (threshold, rank) in THRESHOLDS {
        if f_present >= threshold {
            return rank;
        }
    }

    unreachable!("prevalence fraction {f_present} matched no category threshold")
}

/// Largest number of samples observing any single hash.
pub fn max_presence(store: &PresenceStore) -> usize {
    store
        .presence()
        .values()
        .map(|samples| samples.len())
        .max()
        .unwrap_or(0)
}

/// Classify every hash in the store by prevalence.
pub fn classify(store: &PresenceStore) -> BTreeMap<ItemHash, PangenomeRank> {
    let max_presence = max_presence(store);
    if max_presence == 0 {
        return BTreeMap::new();
    }

    store
        .presence()
        .iter()
        .map(|(hash, samples)| {
            let f_present = samples.len() as f64 / max_presence as f64;
            (*hash, rank_for_fraction(f_present))
        })
        .collect()
}

/// Number of hashes assigned to each category.
pub fn category_counts(categories: &BTreeMap<ItemHash, PangenomeRank>) -> BTreeMap<PangenomeRank, usize> {
    let mut counts = BTreeMap::new();
    for rank in categories.values() {
        *counts.entry(*rank).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::tests::store_from;
    use proptest::prelude::*;

    #[test]
    fn test_thresholds() {
        assert_eq!(rank_for_fraction(1.0), PangenomeRank::CentralCore);
        assert_eq!(rank_for_fraction(0.95), PangenomeRank::CentralCore);
        assert_eq!(rank_for_fraction(0.94), PangenomeRank::ExternalCore);
        assert_eq!(rank_for_fraction(0.90), PangenomeRank::ExternalCore);
        assert_eq!(rank_for_fraction(0.5), PangenomeRank::Shell);
        assert_eq!(rank_for_fraction(0.10), PangenomeRank::Shell);
        assert_eq!(rank_for_fraction(0.05), PangenomeRank::InnerCloud);
        assert_eq!(rank_for_fraction(0.01), PangenomeRank::InnerCloud);
        assert_eq!(rank_for_fraction(0.001), PangenomeRank::SurfaceCloud);
        assert_eq!(rank_for_fraction(0.0), PangenomeRank::SurfaceCloud);
    }

    #[test]
    fn test_classify_three_hashes() {
        let store = store_from(&[(10, &["a", "b"]), (20, &["a"]), (30, &["a", "b", "c"])]);
        assert_eq!(max_presence(&store), 3);

        let categories = classify(&store);
        assert_eq!(categories[&30], PangenomeRank::CentralCore);
        assert_eq!(categories[&10], PangenomeRank::Shell);
        assert_eq!(categories[&20], PangenomeRank::Shell);

        let counts = category_counts(&categories);
        assert_eq!(counts[&PangenomeRank::Shell], 2);
        assert_eq!(counts[&PangenomeRank::CentralCore], 1);
    }

    #[test]
    fn test_classify_empty_store() {
        let store = store_from(&[]);
        assert!(classify(&store).is_empty());
    }

    #[test]
    fn test_rank_lookup() {
        for rank in PangenomeRank::ALL {
            assert_eq!(PangenomeRank::from_rank(rank.rank() as i64).unwrap(), rank);
        }
        assert!(matches!(PangenomeRank::from_rank(0), Err(Error::InvalidRank(0))));
        assert!(matches!(PangenomeRank::from_rank(6), Err(Error::InvalidRank(6))));
        assert_eq!(PangenomeRank::InnerCloud.to_string(), "inner cloud");
    }

    proptest! {
        #[test]
        fn prop_every_hash_gets_one_category(
            counts in prop::collection::vec(1usize..50, 1..40)
        ) {
            let names: Vec<String> = (0..50).map(|i| format!("s{i}")).collect();
            let entries: Vec<(ItemHash, Vec<&str>)> = counts
                .iter()
                .enumerate()
                .map(|(i, &c)| (i as ItemHash, names[..c].iter().map(|s| s.as_str()).collect()))
                .collect();
            let refs: Vec<(ItemHash, &[&str])> =
                entries.iter().map(|(h, s)| (*h, s.as_slice())).collect();
            let store = store_from(&refs);

            let categories = classify(&store);
            prop_assert_eq!(categories.len(), store.len());
            let max_count = counts.iter().copied().max().unwrap();
            for (i, &c) in counts.iter().enumerate() {
                if c == max_count {
                    prop_assert_eq!(categories[&(i as ItemHash)], PangenomeRank::CentralCore);
                }
            }
        }
    }
}
