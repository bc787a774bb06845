
//! HDBSCAN over a precomputed distance matrix.
//!
//! HDBSCAN (Campello, Moulavi, Sander 2013) builds a hierarchy of density-based
//! clusters and keeps the most stable ones:
//!
//! 1. **Core distance**: distance from each point to its `min_samples`-th nearest
//!    neighbour, counting the point itself.
//! 2. **Mutual reachability**: `mrd(i, j) = max(core[i], core[j], dist(i, j))`.
//! 3. **MST** over mutual reachability distances (Prim, O(n^2)).
//! 4. **Single linkage tree** from the MST edges in ascending order.
//! 5. **Condensed tree**: walk the linkage tree from the root; a split only creates
//!    two new clusters when both sides have at least `min_cluster_size` points,
//!    otherwise the smaller side's points fall out of the parent cluster.
//! 6. **Excess of mass selection**: keep the set of non-overlapping clusters with the
//!    greatest total stability. The root is never selected, so data without any
//!    genuine split is all noise.
//!
//! There is no randomness; ties are broken by point index, so results depend only
//! on the distance matrix and parameters.

use std::collections::VecDeque;

use ndarray::Array2;

use crate::error::{Error, Result};

pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 15;

#[derive(Debug, Clone)]
pub struct Hdbscan {
    min_samples: Option<usize>,
    min_cluster_size: usize,
}

impl Default for Hdbscan {
    fn default() -> Self {
        Self {
            min_samples: None,
            min_cluster_size: DEFAULT_MIN_CLUSTER_SIZE,
        }
    }
}

impl Hdbscan {
    /// Defaults: `min_cluster_size = 15`, `min_samples = min_cluster_size`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = Some(min_samples);
        self
    }

    pub fn with_min_cluster_size(mut self, min_cluster_size: usize) -> Self {
        self.min_cluster_size = min_cluster_size;
        self
    }

    pub fn min_cluster_size(&self) -> usize {
        self.min_cluster_size
    }

    /// Neighbour count used for core distances.
    pub fn min_samples(&self) -> usize {
        self.min_samples.unwrap_or(self.min_cluster_size)
    }

    fn validate(&self, dists: &Array2<f64>) -> Result<()> {
        if self.min_cluster_size < 2 {
            return Err(Error::InvalidParameter {
                name: "min_cluster_size",
                message: "must be at least 2".to_string(),
            });
        }

        if self.min_samples == Some(0) {
            return Err(Error::InvalidParameter {
                name: "min_samples",
                message: "must be at least 1".to_string(),
            });
        }

        let (rows, cols) = dists.dim();
        if rows != cols {
            return Err(Error::InvalidParameter {
                name: "distance matrix",
                message: format!("expected a square matrix, found {rows}x{cols}"),
            });
        }

        if dists.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(Error::InvalidParameter {
                name: "distance matrix",
                message: "distances must be finite and non-negative".to_string(),
            });
        }

        Ok(())
    }

    /// Cluster the points of a square distance matrix, returning `None` for noise.
    ///
    /// Cluster labels are contiguous from 0 but carry no ordering.
    pub fn fit_predict(&self, dists: &Array2<f64>) -> Result<Vec<Option<usize>>> {
        self.validate(dists)?;

        let n = dists.nrows();
        if n < 2 || n < self.min_cluster_size {
            return Ok(vec![None; n]);
        }

        let core = core_distances(dists, self.min_samples());

        let mut mst = prim_mst(n, |i, j| mutual_reachability(dists[[i, j]], core[i], core[j]));
        mst.sort_by(|a, b| a.2.total_cmp(&b.2));

        let linkage = single_linkage(&mst, n);
        let tree = condense_tree(&linkage, n, self.min_cluster_size);
        let selected = select_clusters(&tree);

        Ok(label_points(&tree, &selected, n))
    }
}

fn core_distances(dists: &Array2<f64>, min_samples: usize) -> Vec<f64> {
    let n = dists.nrows();
    let k = min_samples.clamp(1, n);

    (0..n)
        .map(|i| {
            let mut row: Vec<f64> = (0..n)
                .map(|j| if i == j { 0.0 } else { dists[[i, j]] })
                .collect();
            row.sort_by(|a, b| a.total_cmp(b));
            row[k - 1]
        })
        .collect()
}

#[inline]
fn mutual_reachability(dist: f64, core_i: f64, core_j: f64) -> f64 {
    dist.max(core_i).max(core_j)
}

/// Compute an MST for a dense complete graph using Prim's algorithm.
///
/// Returns edges `(u, v, dist)`.
fn prim_mst(n: usize, dist_fn: impl Fn(usize, usize) -> f64) -> Vec<(usize, usize, f64)> {
    if n <= 1 {
        return Vec::new();
    }

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut parent = vec![usize::MAX; n];
    best[0] = 0.0;

    for _ in 0..n {
        let mut u = usize::MAX;
        let mut best_val = f64::INFINITY;
        for i in 0..n {
            if !in_tree[i] && (u == usize::MAX || best[i] < best_val) {
                best_val = best[i];
                u = i;
            }
        }

        if u == usize::MAX {
            break;
        }
        in_tree[u] = true;

        for v in 0..n {
            if in_tree[v] {
                continue;
            }
            let d = dist_fn(u, v);
            if d < best[v] {
                best[v] = d;
                parent[v] = u;
            }
        }
    }

    (1..n)
        .filter(|&v| parent[v] != usize::MAX)
        .map(|v| (parent[v], v, best[v]))
        .collect()
}

struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        let mut x = x;
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union_roots(&mut self, ra: usize, rb: usize) -> usize {
        let (big, small) = if self.size[ra] < self.size[rb] { (rb, ra) } else { (ra, rb) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        big
    }
}

/// A merge in the single linkage tree. Node ids `< n` are points; merge `m` is node `n + m`.
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

fn single_linkage(mst: &[(usize, usize, f64)], n: usize) -> Vec<Merge> {
    let mut uf = UnionFind::new(n);
    let mut node_of_root: Vec<usize> = (0..n).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    for &(u, v, distance) in mst {
        let ru = uf.find(u);
        let rv = uf.find(v);
        if ru == rv {
            continue;
        }

        let size = uf.size[ru] + uf.size[rv];
        let (left, right) = (node_of_root[ru], node_of_root[rv]);
        let root = uf.union_roots(ru, rv);
        node_of_root[root] = n + merges.len();
        merges.push(Merge {
            left,
            right,
            distance,
            size,
        });
    }

    merges
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Child {
    Point(usize),
    Cluster(usize),
}

/// Condensed tree row: `child` leaves cluster `parent` at density `lambda`.
struct CondensedEdge {
    parent: usize,
    child: Child,
    lambda: f64,
    child_size: usize,
}

struct CondensedTree {
    edges: Vec<CondensedEdge>,
    num_clusters: usize,
}

/// Density at which a merge happens. Zero distances map to the largest finite value
/// so stabilities stay free of `inf - inf`.
#[inline]
fn lambda_of(distance: f64) -> f64 {
    if distance > 0.0 { 1.0 / distance } else { f64::MAX }
}

fn condense_tree(merges: &[Merge], n: usize, min_cluster_size: usize) -> CondensedTree {
    let node_size = |node: usize| if node < n { 1 } else { merges[node - n].size };

    let mut edges = Vec::new();
    if merges.is_empty() {
        return CondensedTree { edges, num_clusters: 1 };
    }

    let root = n + merges.len() - 1;
    let mut cluster_of = vec![0usize; n + merges.len()];
    let mut num_clusters = 1;
    let mut queue = VecDeque::from([root]);

    while let Some(node) = queue.pop_front() {
        let merge = &merges[node - n];
        let parent = cluster_of[node];
        let lambda = lambda_of(merge.distance);
        let (left, right) = (merge.left, merge.right);
        let (left_size, right_size) = (node_size(left), node_size(right));

        match (left_size >= min_cluster_size, right_size >= min_cluster_size) {
            (true, true) => {
                for (child, child_size) in [(left, left_size), (right, right_size)] {
                    cluster_of[child] = num_clusters;
                    edges.push(CondensedEdge {
                        parent,
                        child: Child::Cluster(num_clusters),
                        lambda,
                        child_size,
                    });
                    num_clusters += 1;
                    queue.push_back(child);
                }
            }
            (true, false) => {
                cluster_of[left] = parent;
                queue.push_back(left);
                fall_out(&mut edges, merges, n, right, parent, lambda);
            }
            (false, true) => {
                cluster_of[right] = parent;
                queue.push_back(right);
                fall_out(&mut edges, merges, n, left, parent, lambda);
            }
            (false, false) => {
                fall_out(&mut edges, merges, n, left, parent, lambda);
                fall_out(&mut edges, merges, n, right, parent, lambda);
            }
        }
    }

    CondensedTree { edges, num_clusters }
}

/// Record every point below `node` as leaving `parent` at `lambda`.
fn fall_out(
    edges: &mut Vec<CondensedEdge>,
    merges: &[Merge],
    n: usize,
    node: usize,
    parent: usize,
    lambda: f64,
) {
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        if node < n {
            edges.push(CondensedEdge {
                parent,
                child: Child::Point(node),
                lambda,
                child_size: 1,
            });
        } else {
            let merge = &merges[node - n];
            stack.push(merge.right);
            stack.push(merge.left);
        }
    }
}

/// Excess of mass cluster selection. Cluster 0 (the root) is never selected.
fn select_clusters(tree: &CondensedTree) -> Vec<bool> {
    let num_clusters = tree.num_clusters;

    let mut birth = vec![0.0f64; num_clusters];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); num_clusters];
    for edge in &tree.edges {
        if let Child::Cluster(c) = edge.child {
            birth[c] = edge.lambda;
            children[edge.parent].push(c);
        }
    }

    let mut stability = vec![0.0f64; num_clusters];
    for edge in &tree.edges {
        stability[edge.parent] += (edge.lambda - birth[edge.parent]) * edge.child_size as f64;
    }

    // children always have larger ids than their parents
    let mut selected = vec![true; num_clusters];
    selected[0] = false;
    for c in (1..num_clusters).rev() {
        if children[c].is_empty() {
            continue;
        }

        let child_stability: f64 = children[c].iter().map(|&k| stability[k]).sum();
        if child_stability > stability[c] {
            selected[c] = false;
            stability[c] = child_stability;
        } else {
            let mut stack = children[c].clone();
            while let Some(k) = stack.pop() {
                selected[k] = false;
                stack.extend(children[k].iter().copied());
            }
        }
    }

    selected
}

/// Label each point with its nearest selected ancestor cluster, or noise.
fn label_points(tree: &CondensedTree, selected: &[bool], n: usize) -> Vec<Option<usize>> {
    let mut parent_of: Vec<Option<usize>> = vec![None; tree.num_clusters];
    let mut fell_from = vec![0usize; n];
    for edge in &tree.edges {
        match edge.child {
            Child::Cluster(c) => parent_of[c] = Some(edge.parent),
            Child::Point(p) => fell_from[p] = edge.parent,
        }
    }

    let mut label_of = vec![None; tree.num_clusters];
    let mut next_label = 0;
    for (c, _) in selected.iter().enumerate().filter(|(_, s)| **s) {
        label_of[c] = Some(next_label);
        next_label += 1;
    }

    fell_from
        .into_iter()
        .map(|cluster| {
            let mut current = Some(cluster);
            while let Some(c) = current {
                if selected[c] {
                    return label_of[c];
                }
                current = parent_of[c];
            }
            None
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Distances for well-separated groups: 0.1 within a group, 0.9 across groups.
    fn grouped_distances(group_sizes: &[usize]) -> Array2<f64> {
        let group_of: Vec<usize> = group_sizes
            .iter()
            .enumerate()
            .flat_map(|(g, &size)| std::iter::repeat_n(g, size))
            .collect();
        let n = group_of.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                0.0
            } else if group_of[i] == group_of[j] {
                0.1
            } else {
                0.9
            }
        })
    }

    fn label_counts(labels: &[Option<usize>]) -> HashMap<usize, usize> {
        let mut counts = HashMap::new();
        for label in labels.iter().flatten() {
            *counts.entry(*label).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn two_well_separated_groups() {
        let dists = grouped_distances(&[20, 20]);
        let labels = Hdbscan::new().with_min_cluster_size(5).fit_predict(&dists).unwrap();

        assert_eq!(labels.len(), 40);
        let l0 = labels[0];
        let l20 = labels[20];
        assert!(l0.is_some());
        assert!(l20.is_some());
        assert_ne!(l0, l20);
        assert!(labels[..20].iter().all(|&l| l == l0));
        assert!(labels[20..].iter().all(|&l| l == l20));
    }

    #[test]
    fn three_groups_with_outliers() {
        let mut dists = grouped_distances(&[16, 25, 18, 1, 1]);
        // the two singletons are far from everything, including each other
        let n = dists.nrows();
        for i in [n - 2, n - 1] {
            for j in 0..n {
                if i != j {
                    dists[[i, j]] = 1.0;
                    dists[[j, i]] = 1.0;
                }
            }
        }

        let labels = Hdbscan::new().with_min_cluster_size(15).fit_predict(&dists).unwrap();
        let counts = label_counts(&labels);
        let mut sizes: Vec<usize> = counts.values().copied().collect();
        sizes.sort_unstable();

        assert_eq!(sizes, vec![16, 18, 25]);
        assert_eq!(labels[n - 1], None);
        assert_eq!(labels[n - 2], None);
    }

    #[test]
    fn too_few_points_are_noise() {
        let dists = grouped_distances(&[3]);
        let labels = Hdbscan::new().with_min_cluster_size(15).fit_predict(&dists).unwrap();
        assert_eq!(labels, vec![None, None, None]);
    }

    #[test]
    fn single_group_is_noise() {
        // the root cluster is never selected
        let dists = grouped_distances(&[30]);
        let labels = Hdbscan::new().with_min_cluster_size(5).fit_predict(&dists).unwrap();
        assert!(labels.iter().all(|l| l.is_none()));
    }

    #[test]
    fn degenerate_zero_matrix() {
        let dists = Array2::<f64>::zeros((40, 40));
        let labels = Hdbscan::new().with_min_cluster_size(15).fit_predict(&dists).unwrap();
        assert_eq!(labels.len(), 40);
        for count in label_counts(&labels).values() {
            assert!(*count >= 15);
        }
    }

    #[test]
    fn empty_and_single_point() {
        let labels = Hdbscan::new().fit_predict(&Array2::zeros((0, 0))).unwrap();
        assert!(labels.is_empty());

        let labels = Hdbscan::new().with_min_cluster_size(2).fit_predict(&Array2::zeros((1, 1))).unwrap();
        assert_eq!(labels, vec![None]);
    }

    #[test]
    fn deterministic() {
        let dists = grouped_distances(&[17, 15, 22]);
        let hdbscan = Hdbscan::new().with_min_cluster_size(15);
        assert_eq!(hdbscan.fit_predict(&dists).unwrap(), hdbscan.fit_predict(&dists).unwrap());
    }

    #[test]
    fn invalid_parameters() {
        let dists = grouped_distances(&[4]);
        assert!(Hdbscan::new().with_min_cluster_size(1).fit_predict(&dists).is_err());
        assert!(Hdbscan::new().with_min_samples(0).fit_predict(&dists).is_err());
        assert!(Hdbscan::new().fit_predict(&Array2::zeros((2, 3))).is_err());

        let mut bad = dists.clone();
        bad[[0, 1]] = f64::NAN;
        assert!(Hdbscan::new().fit_predict(&bad).is_err());
    }

    #[test]
    fn non_noise_labels_meet_min_cluster_size() {
        let dists = Array2::from_shape_fn((60, 60), |(i, j)| {
            if i == j {
                0.0
            } else {
                ((i * 31 + j * 31 + (i * j) % 7) % 97) as f64 / 97.0
            }
        });
        for min_cluster_size in [2, 5, 10] {
            let labels = Hdbscan::new()
                .with_min_cluster_size(min_cluster_size)
                .fit_predict(&dists)
                .unwrap();
            for count in label_counts(&labels).values() {
                assert!(*count >= min_cluster_size);
            }
        }
    }
}
