//! Ward agglomerative clustering
//!
//! Merges are found with the nearest-neighbor chain on a condensed matrix of
//! squared Euclidean distances, updated by the Lance-Williams Ward rule. The
//! merge list is then sorted by height and relabelled so that ids `0..n` are
//! rows and `n + i` is the cluster formed by the i-th merge.

use crate::structs::{
    ClusterAssignment, DendrogramNode, LabError, Merge, NormalizedFeatures, Result,
};
use std::collections::HashMap;

/// Full merge history over `n_leaves` rows, sorted by height
#[derive(Debug, Clone, PartialEq)]
pub struct MergeTree {
    pub n_leaves: usize,
    pub merges: Vec<Merge>,
}

#[inline]
fn condensed_index(n: usize, i: usize, j: usize) -> usize {
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    i * n - i * (i + 1) / 2 + j - i - 1
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// Build the Ward merge tree of the feature rows
///
/// # Errors
/// Returns `EmptyResult` when there are no rows
#[allow(clippy::cast_precision_loss)]
pub fn ward(features: &NormalizedFeatures) -> Result<MergeTree> {
    let data = &features.data;
    let n = data.len();
    if n == 0 {
        return Err(LabError::EmptyResult("No rows to cluster".into()));
    }

    let mut dist = vec![0.0_f64; n * (n - 1) / 2];
    for i in 0..n {
        for j in (i + 1)..n {
            dist[condensed_index(n, i, j)] = data[i]
                .iter()
                .zip(&data[j])
                .map(|(a, b)| (a - b).powi(2))
                .sum();
        }
    }

    let mut active = vec![true; n];
    let mut size = vec![1usize; n];
    let mut chain: Vec<usize> = Vec::with_capacity(n);
    // (absorbed slot, surviving slot, squared height)
    let mut raw: Vec<(usize, usize, f64)> = Vec::with_capacity(n.saturating_sub(1));

    for _ in 1..n {
        if chain.is_empty() {
            if let Some(start) = active.iter().position(|&a| a) {
                chain.push(start);
            }
        }

        let (x, y, d_xy) = loop {
            let Some(&x) = chain.last() else {
                return Err(LabError::Computation("Merge chain ran empty".into()));
            };
            let prev = chain.len().checked_sub(2).map(|i| chain[i]);

            let mut best = prev;
            let mut best_d = prev.map_or(f64::INFINITY, |p| dist[condensed_index(n, x, p)]);
            for i in (0..n).filter(|&i| active[i] && i != x) {
                let d = dist[condensed_index(n, x, i)];
                if d < best_d {
                    best_d = d;
                    best = Some(i);
                }
            }

            let Some(y) = best else {
                return Err(LabError::Computation("No merge partner found".into()));
            };
            if Some(y) == prev {
                chain.truncate(chain.len() - 2);
                break (x, y, best_d);
            }
            chain.push(y);
        };

        let (sx, sy) = (size[x] as f64, size[y] as f64);
        for k in (0..n).filter(|&k| active[k] && k != x && k != y) {
            let sk = size[k] as f64;
            let d_xk = dist[condensed_index(n, x, k)];
            let d_yk = dist[condensed_index(n, y, k)];
            let updated = ((sx + sk) * d_xk + (sy + sk) * d_yk - sk * d_xy) / (sx + sy + sk);
            dist[condensed_index(n, y, k)] = updated.max(0.0);
        }

        active[x] = false;
        size[y] += size[x];
        raw.push((x, y, d_xy));
    }

    raw.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut parent: Vec<usize> = (0..(2 * n).saturating_sub(1)).collect();
    let mut node_size = vec![1usize; parent.len()];
    let mut merges = Vec::with_capacity(raw.len());
    for (i, &(a, b, d)) in raw.iter().enumerate() {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let id = n + i;
        parent[ra] = id;
        parent[rb] = id;
        node_size[id] = node_size[ra] + node_size[rb];
        merges.push(Merge {
            left: ra.min(rb),
            right: ra.max(rb),
            distance: d.sqrt(),
            size: node_size[id],
        });
    }

    log::debug!("Ward tree: {n} leaves, {} merges", merges.len());
    Ok(MergeTree {
        n_leaves: n,
        merges,
    })
}

impl MergeTree {
    /// Flat cut into exactly `k` clusters, labels `1..=k` by first appearance
    ///
    /// # Errors
    /// Returns `Computation` if `k` is zero or exceeds the leaf count
    pub fn cut(&self, k: usize) -> Result<Vec<usize>> {
        let n = self.n_leaves;
        crate::ml::clustering::check_cluster_count(k, n)?;

        let mut parent: Vec<usize> = (0..(2 * n).saturating_sub(1)).collect();
        for (i, merge) in self.merges.iter().take(n - k).enumerate() {
            let id = n + i;
            let ra = find(&mut parent, merge.left);
            let rb = find(&mut parent, merge.right);
            parent[ra] = id;
            parent[rb] = id;
        }

        let mut label_of_root: HashMap<usize, usize> = HashMap::new();
        Ok((0..n)
            .map(|leaf| {
                let root = find(&mut parent, leaf);
                let next = label_of_root.len() + 1;
                *label_of_root.entry(root).or_insert(next)
            })
            .collect())
    }

    /// Display tree with at most `levels` merge levels below the root
    ///
    /// Merge nodes deeper than `levels` become [`DendrogramNode::Collapsed`]
    /// carrying their leaf count.
    #[must_use]
    pub fn display_tree(&self, levels: usize) -> DendrogramNode {
        let n = self.n_leaves;
        if self.merges.is_empty() {
            return DendrogramNode::Leaf { index: 0 };
        }
        self.node(n + self.merges.len() - 1, 0, levels)
    }

    fn node(&self, id: usize, depth: usize, levels: usize) -> DendrogramNode {
        let n = self.n_leaves;
        let Some(merge) = id.checked_sub(n).and_then(|i| self.merges.get(i)) else {
            return DendrogramNode::Leaf { index: id };
        };
        if depth > levels {
            return DendrogramNode::Collapsed {
                size: merge.size,
                distance: merge.distance,
            };
        }
        DendrogramNode::Merge {
            distance: merge.distance,
            size: merge.size,
            left: Box::new(self.node(merge.left, depth + 1, levels)),
            right: Box::new(self.node(merge.right, depth + 1, levels)),
        }
    }
}

/// Ward clustering cut into `k` groups, with its display tree
#[derive(Debug, Clone)]
pub struct HierarchyResult {
    pub tree: MergeTree,
    pub display: DendrogramNode,
    pub assignment: ClusterAssignment,
}

/// # Errors
/// Returns error if `k` is invalid or there are no rows
pub fn hierarchical(
    features: &NormalizedFeatures,
    k: usize,
    levels: usize,
) -> Result<HierarchyResult> {
    crate::ml::clustering::check_cluster_count(k, features.n_samples())?;
    let tree = ward(features)?;
    let labels = tree.cut(k)?;
    let display = tree.display_tree(levels);
    let assignment = ClusterAssignment {
        subject_ids: features.subject_ids.clone(),
        labels,
        k,
    };
    log::debug!("Ward cut: {}", assignment.summary());
    Ok(HierarchyResult {
        tree,
        display,
        assignment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(rows: &[&[f64]]) -> NormalizedFeatures {
        let width = rows.first().map_or(0, |r| r.len());
        NormalizedFeatures {
            names: (0..width).map(|i| format!("f{i}")).collect(),
            data: rows.iter().map(|r| r.to_vec()).collect(),
            subject_ids: (0..rows.len() as u64).collect(),
            means: vec![0.0; width],
            std_devs: vec![1.0; width],
        }
    }

    fn depth(node: &DendrogramNode) -> usize {
        match node {
            DendrogramNode::Merge { left, right, .. } => 1 + depth(left).max(depth(right)),
            _ => 0,
        }
    }

    fn leaves(node: &DendrogramNode) -> usize {
        match node {
            DendrogramNode::Leaf { .. } => 1,
            DendrogramNode::Collapsed { size, .. } => *size,
            DendrogramNode::Merge { left, right, .. } => leaves(left) + leaves(right),
        }
    }

    #[test]
    fn test_ward_heights() {
        let tree = ward(&features(&[&[0.0], &[1.0], &[10.0]])).expect("ward");

        assert_eq!(tree.merges.len(), 2);
        assert_eq!(tree.merges[0].left, 0);
        assert_eq!(tree.merges[0].right, 1);
        assert!((tree.merges[0].distance - 1.0).abs() < 1e-12);
        assert_eq!(tree.merges[0].size, 2);

        // sqrt(2 * 2 * 1 / 3) * |0.5 - 10|
        assert_eq!(tree.merges[1].left, 2);
        assert_eq!(tree.merges[1].right, 3);
        let expected = (4.0_f64 / 3.0).sqrt() * 9.5;
        assert!((tree.merges[1].distance - expected).abs() < 1e-9);
        assert_eq!(tree.merges[1].size, 3);
    }

    #[test]
    fn test_merges_sorted_and_complete() {
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| {
                let x = f64::from(i);
                vec![(x * 0.7).sin() * 5.0, x % 7.0]
            })
            .collect();
        let refs: Vec<&[f64]> = rows.iter().map(Vec::as_slice).collect();
        let tree = ward(&features(&refs)).expect("ward");

        assert_eq!(tree.merges.len(), 29);
        assert!(tree.merges.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(tree.merges.last().map(|m| m.size), Some(30));
    }

    #[test]
    fn test_cut_separates_groups() {
        let tree = ward(&features(&[
            &[0.0, 0.0],
            &[10.0, 10.0],
            &[0.2, 0.1],
            &[10.1, 9.8],
            &[0.1, 0.3],
        ]))
        .expect("ward");

        assert_eq!(tree.cut(2).expect("cut"), vec![1, 2, 1, 2, 1]);
        assert_eq!(tree.cut(1).expect("cut"), vec![1; 5]);
        assert_eq!(tree.cut(5).expect("cut"), vec![1, 2, 3, 4, 5]);
        assert_eq!(tree.cut(0).expect_err("k = 0").code(), 3);
        assert_eq!(tree.cut(6).expect_err("k > n").code(), 3);
    }

    #[test]
    fn test_display_tree_truncation() {
        let rows: Vec<Vec<f64>> = (0..64).map(|i| vec![f64::from(i).powf(1.3)]).collect();
        let refs: Vec<&[f64]> = rows.iter().map(Vec::as_slice).collect();
        let tree = ward(&features(&refs)).expect("ward");

        let display = tree.display_tree(3);
        assert!(depth(&display) <= 4);
        assert_eq!(leaves(&display), 64);

        let full = tree.display_tree(usize::MAX - 1);
        assert_eq!(leaves(&full), 64);
        assert!(depth(&full) >= depth(&display));
    }

    #[test]
    fn test_single_row() {
        let result = hierarchical(&features(&[&[1.0, 2.0]]), 1, 3).expect("one row");
        assert!(result.tree.merges.is_empty());
        assert_eq!(result.display, DendrogramNode::Leaf { index: 0 });
        assert_eq!(result.assignment.labels, vec![1]);
    }
}
