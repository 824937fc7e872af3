//! Retrieval quality measures.
//!
//! Both functions compare a candidate ranking (`test`) against an exact ranking
//! (`groundtruth`) at level `k`, where the effective level is
//! `min(k, groundtruth.len())`. A `test` list shorter than the level simply
//! contributes nothing past its end.

/// Fraction of the first `level` ground-truth ids that also appear among the
/// first `level` entries of `test`.
///
/// Order does not matter. Returns `0.0` for empty ground truth.
pub fn recall<T: PartialEq>(groundtruth: &[T], test: &[T], k: usize) -> f64 {
    if groundtruth.is_empty() || k == 0 {
        return 0.0;
    }
    let level = k.min(groundtruth.len());
    let retrieved = &test[..level.min(test.len())];
    let hits = groundtruth[..level]
        .iter()
        .filter(|id| retrieved.contains(id))
        .count();
    hits as f64 / level as f64
}

/// [`recall`] at the level `groundtruth.len()`.
pub fn recall_full<T: PartialEq>(groundtruth: &[T], test: &[T]) -> f64 {
    recall(groundtruth, test, groundtruth.len())
}

/// Discounted cumulative gain of `test` against `groundtruth`.
///
/// An item at 0-based rank `i` in `test` that sits at ground-truth rank `j < level`
/// contributes `(groundtruth.len() + 1 - j) / log2(i + 2)`.
pub fn dcg<T: PartialEq>(groundtruth: &[T], test: &[T], k: usize) -> f64 {
    if groundtruth.is_empty() {
        return 0.0;
    }
    let level = k.min(groundtruth.len());
    let n = groundtruth.len() as f64;
    test.iter()
        .take(level)
        .enumerate()
        .filter_map(|(i, item)| {
            let j = groundtruth[..level].iter().position(|g| g == item)?;
            Some((n + 1.0 - j as f64) / discount(i))
        })
        .sum()
}

/// DCG of the ground truth against itself.
fn ideal_dcg(len: usize, level: usize) -> f64 {
    let n = len as f64;
    (0..level).map(|i| (n + 1.0 - i as f64) / discount(i)).sum()
}

/// Normalized DCG in `[0, 1]` for rankings without duplicates.
///
/// Returns `0.0` for empty ground truth or `k == 0`.
pub fn ndcg<T: PartialEq>(groundtruth: &[T], test: &[T], k: usize) -> f64 {
    if groundtruth.is_empty() || k == 0 {
        return 0.0;
    }
    let level = k.min(groundtruth.len());
    dcg(groundtruth, test, k) / ideal_dcg(groundtruth.len(), level)
}

/// [`ndcg`] at the level `groundtruth.len()`.
pub fn ndcg_full<T: PartialEq>(groundtruth: &[T], test: &[T]) -> f64 {
    ndcg(groundtruth, test, groundtruth.len())
}

fn discount(rank: usize) -> f64 {
    (rank as f64 + 2.0).log2()
}

/// Both measures at once, for callers that hold id lists from a store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quality {
    pub recall: f64,
    pub ndcg: f64,
}

impl Quality {
    pub fn compute<T: PartialEq>(groundtruth: &[T], test: &[T], k: usize) -> Self {
        Self {
            recall: recall(groundtruth, test, k),
            ndcg: ndcg(groundtruth, test, k),
        }
    }
}
