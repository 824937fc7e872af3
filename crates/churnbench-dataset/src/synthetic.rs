//! Seeded synthetic vectors.
//!
//! Points are scattered around `clusters` random centers in `[-1, 1]^dim`, which
//! gives nearest-neighbor queries a non-trivial structure while staying cheap to
//! generate.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generates `count` vectors of `dim` components around `clusters` centers.
///
/// Deterministic for a given `seed`.
pub fn clustered(count: usize, dim: usize, clusters: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let clusters = clusters.max(1);
    let centers: Vec<Vec<f32>> = (0..clusters)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..=1.0)).collect())
        .collect();

    (0..count)
        .map(|_| {
            let center = &centers[rng.gen_range(0..clusters)];
            center
                .iter()
                .map(|c| c + rng.gen_range(-0.15f32..=0.15))
                .collect()
        })
        .collect()
}
