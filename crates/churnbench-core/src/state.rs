//! Shared run state: mutation counters and feature statistics.
//!
//! Counters are plain atomics updated by the generators and read
//! opportunistically by the sampler. `deleted_ids` has its own lock; delete
//! sampling and claiming happen under it so no id is scheduled twice.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

// ============================================================================
// MutationState
// ============================================================================

#[derive(Debug, Default)]
pub struct MutationState {
    max_id: AtomicI64,
    deleted_ids: Mutex<HashSet<i64>>,
    inserts_executed: AtomicU64,
    deletes_executed: AtomicU64,
    out_of_bounds: AtomicU64,
    index_rebuilt: AtomicBool,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub max_id: i64,
    pub inserts_executed: u64,
    pub deletes_executed: u64,
    pub out_of_bounds: u64,
    pub index_rebuilt: bool,
}

impl MutationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State after a preload whose highest id was `max_id`.
    pub fn with_max_id(max_id: i64) -> Self {
        let state = Self::default();
        state.observe_max_id(max_id);
        state
    }

    pub fn max_id(&self) -> i64 {
        self.max_id.load(Ordering::Acquire)
    }

    /// Raises `max_id` to `id` if it is larger. Never lowers it.
    pub fn observe_max_id(&self, id: i64) {
        self.max_id.fetch_max(id, Ordering::AcqRel);
    }

    /// Records a committed insert batch.
    pub fn record_insert(&self, rows: u64, batch_max_id: Option<i64>) {
        self.inserts_executed.fetch_add(rows, Ordering::Relaxed);
        if let Some(id) = batch_max_id {
            self.observe_max_id(id);
        }
    }

    /// Records a committed delete with the store-reported row count.
    pub fn record_delete(&self, deleted: u64) {
        self.deletes_executed.fetch_add(deleted, Ordering::Relaxed);
    }

    pub fn record_out_of_bounds(&self, vectors: u64) {
        if vectors > 0 {
            self.out_of_bounds.fetch_add(vectors, Ordering::Relaxed);
        }
    }

    /// Sets the rebuilt flag. Returns `true` only for the call that flipped it.
    pub fn mark_rebuilt(&self) -> bool {
        self.index_rebuilt
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn index_rebuilt(&self) -> bool {
        self.index_rebuilt.load(Ordering::Acquire)
    }

    pub fn inserts_executed(&self) -> u64 {
        self.inserts_executed.load(Ordering::Relaxed)
    }

    pub fn deletes_executed(&self) -> u64 {
        self.deletes_executed.load(Ordering::Relaxed)
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted_ids.lock().len()
    }

    pub fn is_deleted(&self, id: i64) -> bool {
        self.deleted_ids.lock().contains(&id)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            max_id: self.max_id(),
            inserts_executed: self.inserts_executed(),
            deletes_executed: self.deletes_executed(),
            out_of_bounds: self.out_of_bounds.load(Ordering::Relaxed),
            index_rebuilt: self.index_rebuilt(),
        }
    }

    /// Picks up to `count` distinct ids from `[1, max_id]` that have not been
    /// claimed before, and claims them.
    ///
    /// Returns fewer ids when fewer remain and nothing when `max_id` is 0.
    pub fn claim_deletions<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<i64> {
        let max_id = self.max_id();
        if max_id <= 0 || count == 0 {
            return Vec::new();
        }
        let mut deleted = self.deleted_ids.lock();
        let available = (max_id as u64).saturating_sub(deleted.len() as u64);
        let count = (count as u64).min(available) as usize;
        if count == 0 {
            return Vec::new();
        }

        let picked: Vec<i64> = if (count as u64) * 2 > available {
            // Dense request: enumerate what is left instead of rejection sampling.
            let mut remaining: Vec<i64> = (1..=max_id).filter(|id| !deleted.contains(id)).collect();
            let (chosen, _) = remaining.partial_shuffle(rng, count);
            chosen.to_vec()
        } else {
            let mut chosen = HashSet::with_capacity(count);
            while chosen.len() < count {
                let id = rng.gen_range(1..=max_id);
                if !deleted.contains(&id) {
                    chosen.insert(id);
                }
            }
            chosen.into_iter().collect()
        };
        deleted.extend(picked.iter().copied());
        picked
    }
}

// ============================================================================
// FeatureStatistics
// ============================================================================

/// Per-dimension mean, minimum and maximum over the preloaded corpus.
///
/// Built during preparation and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStatistics {
    count: u64,
    mean: Vec<f64>,
    min: Vec<f32>,
    max: Vec<f32>,
}

impl FeatureStatistics {
    pub fn new(dimension: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dimension],
            min: vec![f32::INFINITY; dimension],
            max: vec![f32::NEG_INFINITY; dimension],
        }
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn observe(&mut self, vector: &[f32]) {
        self.count += 1;
        let n = self.count as f64;
        for (d, x) in vector.iter().enumerate().take(self.mean.len()) {
            self.mean[d] += (f64::from(*x) - self.mean[d]) / n;
            self.min[d] = self.min[d].min(*x);
            self.max[d] = self.max[d].max(*x);
        }
    }

    /// Whether any component of `vector` lies outside the observed `[min, max]`.
    ///
    /// Always `false` before anything has been observed.
    pub fn is_out_of_bounds(&self, vector: &[f32]) -> bool {
        if self.count == 0 {
            return false;
        }
        vector
            .iter()
            .zip(self.min.iter().zip(&self.max))
            .any(|(x, (lo, hi))| x < lo || x > hi)
    }

    /// Adds uniform noise in `±magnitude * |mean[d]|` to each component.
    pub fn jitter<R: Rng + ?Sized>(&self, vector: &mut [f32], magnitude: f64, rng: &mut R) {
        if magnitude <= 0.0 {
            return;
        }
        for (x, mean) in vector.iter_mut().zip(&self.mean) {
            let bound = magnitude * mean.abs();
            if bound > 0.0 {
                *x += rng.gen_range(-bound..=bound) as f32;
            }
        }
    }
}
