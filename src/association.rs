
//! Hash-by-hash association (Jaccard similarity of presence sets) and the
//! sample-by-hash presence matrix.
//!
//! The association matrix is O(n^2) in the number of hashes and dominates the running
//! time of every analysis, so stores should be filtered before it is built. Rows are
//! computed in parallel; each worker owns whole rows of the output buffer.

use std::collections::BTreeSet;

use indicatif::ProgressBar;
use ndarray::Array2;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::presence::PresenceStore;
use crate::progress::progress_bar;
use crate::sketch::ItemHash;

/// Symmetric hash-by-hash similarity matrix with unit diagonal.
#[derive(Clone, Debug, PartialEq)]
pub struct AssociationMatrix {
    pub hashes: Vec<ItemHash>,
    pub similarity: Array2<f64>,
}

impl AssociationMatrix {
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Distance matrix `1 - similarity`.
    pub fn distances(&self) -> Array2<f64> {
        self.similarity.mapv(|s| 1.0 - s)
    }
}

/// Binary sample-by-hash presence matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct PresenceMatrix {
    pub samples: Vec<String>,
    pub hashes: Vec<ItemHash>,
    pub presence: Array2<u8>,
}

/// Number of shared elements between two ascending slices.
fn intersection_size(a: &[u32], b: &[u32]) -> usize {
    let (mut i, mut j, mut shared) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    shared
}

#[inline]
fn jaccard(a: &[u32], b: &[u32]) -> f64 {
    let shared = intersection_size(a, b);
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Presence sets of all hashes as ascending sample indices.
fn indexed_presence(store: &PresenceStore) -> Result<(Vec<ItemHash>, Vec<Vec<u32>>)> {
    let sample_index: FxHashMap<&str, u32> = store
        .samples()
        .into_iter()
        .enumerate()
        .map(|(idx, name)| (name, idx as u32))
        .collect();

    let mut hashes = Vec::with_capacity(store.len());
    let mut presence = Vec::with_capacity(store.len());
    for (hash, samples) in store.presence() {
        if samples.is_empty() {
            return Err(Error::EmptyPresence(*hash));
        }

        let mut indices: Vec<u32> = samples.iter().map(|s| sample_index[s.as_str()]).collect();
        indices.sort_unstable();
        hashes.push(*hash);
        presence.push(indices);
    }

    Ok((hashes, presence))
}

/// Build the Jaccard association matrix over hashes sorted ascending.
pub fn build_association_matrix(store: &PresenceStore) -> Result<AssociationMatrix> {
    build_association_matrix_with_progress(store, &ProgressBar::hidden())
}

pub fn build_association_matrix_with_progress(
    store: &PresenceStore,
    progress: &ProgressBar,
) -> Result<AssociationMatrix> {
    let (hashes, presence) = indexed_presence(store)?;
    let n = hashes.len();
    if n == 0 {
        return Ok(AssociationMatrix {
            hashes,
            similarity: Array2::zeros((0, 0)),
        });
    }

    let mut cells = vec![0.0f64; n * n];
    cells.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let presence_i = &presence[i];
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = if i == j {
                1.0
            } else {
                jaccard(presence_i, &presence[j])
            };
        }
        progress.inc(1);
    });

    let similarity = Array2::from_shape_vec((n, n), cells).map_err(|e| Error::InvalidParameter {
        name: "association matrix",
        message: e.to_string(),
    })?;

    Ok(AssociationMatrix { hashes, similarity })
}

/// Build the association matrix, reporting progress per row on stderr.
pub fn build_association_matrix_verbose(store: &PresenceStore) -> Result<AssociationMatrix> {
    let progress = progress_bar(store.len() as u64, "rows");
    let matrix = build_association_matrix_with_progress(store, &progress)?;
    progress.finish();
    Ok(matrix)
}

/// Build the sample-by-hash presence matrix; rows are samples sorted by name.
pub fn build_presence_matrix(store: &PresenceStore) -> PresenceMatrix {
    let samples: Vec<String> = store.samples().into_iter().map(String::from).collect();
    let hashes: Vec<ItemHash> = store.hashes().collect();

    let mut presence = Array2::<u8>::zeros((samples.len(), hashes.len()));
    for (col, hash) in hashes.iter().enumerate() {
        let observed: &BTreeSet<String> = store.presence_of(*hash);
        for (row, sample) in samples.iter().enumerate() {
            if observed.contains(sample) {
                presence[[row, col]] = 1;
            }
        }
    }

    PresenceMatrix {
        samples,
        hashes,
        presence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::tests::store_from;
    use crate::presence::{CategoryMap, PresenceMap};
    use crate::sketch::{DNA, max_hash_for_scaled};
    use proptest::prelude::*;

    #[test]
    fn test_two_hash_matrix() {
        let store = store_from(&[(30, &["a", "b", "c"]), (10, &["a", "b"])]);
        let matrix = build_association_matrix(&store).unwrap();

        assert_eq!(matrix.hashes, vec![10, 30]);
        assert_eq!(matrix.similarity[[0, 0]], 1.0);
        assert_eq!(matrix.similarity[[1, 1]], 1.0);
        assert_eq!(matrix.similarity[[0, 1]], 2.0 / 3.0);
        assert_eq!(matrix.similarity[[1, 0]], 2.0 / 3.0);

        let dist = matrix.distances();
        assert_eq!(dist[[0, 0]], 0.0);
        assert!((dist[[0, 1]] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_disjoint_and_single_sample() {
        let store = store_from(&[(1, &["a"]), (2, &["b"]), (3, &["a"])]);
        let matrix = build_association_matrix(&store).unwrap();

        assert_eq!(matrix.similarity[[0, 1]], 0.0);
        assert_eq!(matrix.similarity[[0, 2]], 1.0);
        assert_eq!(matrix.similarity[[1, 2]], 0.0);
    }

    #[test]
    fn test_empty_store() {
        let matrix = build_association_matrix(&store_from(&[])).unwrap();
        assert!(matrix.is_empty());
        assert_eq!(matrix.similarity.dim(), (0, 0));
    }

    #[test]
    fn test_presence_matrix() {
        let store = store_from(&[(10, &["b", "a"]), (20, &["c"])]);
        let matrix = build_presence_matrix(&store);

        assert_eq!(matrix.samples, vec!["a", "b", "c"]);
        assert_eq!(matrix.hashes, vec![10, 20]);
        assert_eq!(matrix.presence, ndarray::arr2(&[[1u8, 0], [1, 0], [0, 1]]));
    }

    #[test]
    fn test_intersection_size() {
        assert_eq!(intersection_size(&[1, 3, 5, 7], &[2, 3, 4, 7, 9]), 2);
        assert_eq!(intersection_size(&[], &[1]), 0);
    }

    fn arb_store() -> impl Strategy<Value = PresenceStore> {
        prop::collection::btree_map(0..=max_hash_for_scaled(1), prop::collection::btree_set("[a-h]", 1..8), 0..25)
            .prop_map(|presence_of: PresenceMap| {
                PresenceStore::new(21, 1, DNA, CategoryMap::new(), presence_of).unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_symmetric_bounded_deterministic(store in arb_store()) {
            let matrix = build_association_matrix(&store).unwrap();
            let again = build_association_matrix(&store).unwrap();
            prop_assert_eq!(&matrix, &again);

            let n = matrix.len();
            prop_assert!(matrix.hashes.windows(2).all(|w| w[0] < w[1]));
            for i in 0..n {
                prop_assert_eq!(matrix.similarity[[i, i]], 1.0);
                for j in 0..n {
                    let s = matrix.similarity[[i, j]];
                    prop_assert_eq!(s.to_bits(), matrix.similarity[[j, i]].to_bits());
                    prop_assert!((0.0..=1.0).contains(&s));
                }
            }
        }
    }
}
