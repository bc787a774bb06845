
//! Partition hashes into clusters of co-occurring hashes.
//!
//! Distances are `1 - jaccard` from the association matrix. Clusters are renumbered by
//! descending size, with equal-sized clusters ordered by their smallest hash.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use itertools::Itertools;
use log::debug;
use rustc_hash::FxHashMap;

use crate::association::AssociationMatrix;
use crate::error::Result;
use crate::hdbscan::Hdbscan;
use crate::sketch::ItemHash;

/// Clusters indexed by id (0 = largest) plus the unclustered hashes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterAssignment {
    pub clusters: Vec<BTreeSet<ItemHash>>,
    pub unclustered: BTreeSet<ItemHash>,
}

impl ClusterAssignment {
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Every hash with its cluster id, in cluster order then unclustered.
    pub fn labelled_hashes(&self) -> impl Iterator<Item = (ItemHash, Option<usize>)> + '_ {
        self.clusters
            .iter()
            .enumerate()
            .flat_map(|(id, members)| members.iter().map(move |hash| (*hash, Some(id))))
            .chain(self.unclustered.iter().map(|hash| (*hash, None)))
    }
}

/// Group raw labels into clusters ranked by size.
pub fn rank_clusters(hashes: &[ItemHash], labels: &[Option<usize>]) -> ClusterAssignment {
    let mut by_label: FxHashMap<usize, BTreeSet<ItemHash>> = FxHashMap::default();
    let mut unclustered = BTreeSet::new();

    for (hash, label) in hashes.iter().zip(labels) {
        match label {
            Some(label) => {
                by_label.entry(*label).or_default().insert(*hash);
            }
            None => {
                unclustered.insert(*hash);
            }
        }
    }

    // tie-break on the smallest member hash
    let clusters = by_label
        .into_values()
        .sorted_by_key(|members| (Reverse(members.len()), members.first().copied()))
        .collect();

    ClusterAssignment {
        clusters,
        unclustered,
    }
}

/// Cluster the hashes of an association matrix. `min_samples` defaults to `min_cluster_size`.
pub fn cluster_hashes(
    matrix: &AssociationMatrix,
    min_cluster_size: usize,
    min_samples: Option<usize>,
) -> Result<ClusterAssignment> {
    let mut hdbscan = Hdbscan::new().with_min_cluster_size(min_cluster_size);
    if let Some(min_samples) = min_samples {
        hdbscan = hdbscan.with_min_samples(min_samples);
    }
    debug!(
        "HDBSCAN over {} hashes: min_cluster_size={}, min_samples={}",
        matrix.len(),
        hdbscan.min_cluster_size(),
        hdbscan.min_samples()
    );

    let labels = hdbscan.fit_predict(&matrix.distances())?;
    Ok(rank_clusters(&matrix.hashes, &labels))
}
