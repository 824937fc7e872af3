//! Run configuration.
//!
//! A [`RunConfig`] is fixed for the lifetime of a run. Times are in seconds as
//! `f64` so short runs (tests, smoke checks) can use fractions of a second;
//! pauses are millisecond ranges.

use crate::error::{BenchError, BenchResult};
use churnbench_store::IndexType;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest mutation batch a run may request, after ratio scaling.
pub const MAX_BATCH_OPERATIONS: u64 = 10_000_000;

/// Inclusive bounds on mutation batch sizes before ratio scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationBounds {
    pub min: u64,
    pub max: u64,
}

impl Default for OperationBounds {
    fn default() -> Self {
        Self { min: 100, max: 5000 }
    }
}

impl OperationBounds {
    /// `[min * ratio, max * ratio]`, rounded to whole rows.
    pub fn scaled(&self, ratio: f64) -> (u64, u64) {
        let lo = (self.min as f64 * ratio).round() as u64;
        let hi = (self.max as f64 * ratio).round() as u64;
        (lo, hi.max(lo))
    }
}

/// Inclusive millisecond range for randomized sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl PauseRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let ms = if self.max_ms <= self.min_ms {
            self.min_ms
        } else {
            rng.gen_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Resubmit immediately.
    None,
    Exponential { initial_ms: u64, max_ms: u64 },
}

/// How mutation batches react to `ResourceExhausted`.
///
/// Retries never give up on their own. With `cancel_aware` the loop also stops
/// once the run leaves `RUNNING`, abandoning the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    pub cancel_aware: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::None,
            cancel_aware: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self.backoff {
            Backoff::None => None,
            Backoff::Exponential { initial_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
                Some(Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms)))
            }
        }
    }
}

/// Where the sampler takes its query vectors from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFeed {
    /// Replay the query dataset, reopening it when exhausted.
    #[default]
    Dataset,
    /// Query with vectors the insert generators just wrote.
    Inserted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Output directory name under `<workdir>/out/`; a timestamp when unset.
    pub name: Option<String>,
    pub entity: String,
    pub id_column: String,
    pub vector_column: String,
    pub dimension: usize,
    pub corpus_size: u64,
    pub duration: f64,
    pub rebuild_after: Option<f64>,
    pub insert_ratio: f64,
    pub delete_ratio: f64,
    pub operation_bounds: OperationBounds,
    pub jitter: f64,
    pub k: usize,
    pub index_type: IndexType,
    pub parallelism: usize,
    pub head_start: f64,
    pub writers: usize,
    pub generator_pause: PauseRange,
    pub sampler_pause: PauseRange,
    pub commit_every: u64,
    pub load_batch: usize,
    pub index_poll_interval_ms: u64,
    pub retry: RetryPolicy,
    pub query_feed: QueryFeed,
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: None,
            entity: "churnbench.adaptive".to_string(),
            id_column: "id".to_string(),
            vector_column: "feature".to_string(),
            dimension: 96,
            corpus_size: 1_000_000,
            duration: 3600.0,
            rebuild_after: None,
            insert_ratio: 1.0,
            delete_ratio: 0.1,
            operation_bounds: OperationBounds::default(),
            jitter: 0.0,
            k: 10,
            index_type: IndexType::Pq,
            parallelism: 1,
            head_start: 0.0,
            writers: 1,
            generator_pause: PauseRange::new(1, 500),
            sampler_pause: PauseRange::new(10, 1000),
            commit_every: 1_000_000,
            load_batch: 1000,
            index_poll_interval_ms: 10_000,
            retry: RetryPolicy::default(),
            query_feed: QueryFeed::Dataset,
            seed: 1,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> BenchResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BenchError::config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| BenchError::config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.entity.trim().is_empty() {
            return Err(BenchError::config("entity must not be empty"));
        }
        if self.dimension == 0 {
            return Err(BenchError::config("dimension must be > 0"));
        }
        if self.k == 0 {
            return Err(BenchError::config("k must be > 0"));
        }
        if self.operation_bounds.min > self.operation_bounds.max {
            return Err(BenchError::config(format!(
                "operation bounds are inverted: [{}, {}]",
                self.operation_bounds.min, self.operation_bounds.max
            )));
        }
        for (name, ratio) in [("insert_ratio", self.insert_ratio), ("delete_ratio", self.delete_ratio)] {
            if !ratio.is_finite() || ratio < 0.0 {
                return Err(BenchError::config(format!("{name} must be a finite value >= 0")));
            }
        }
        for (name, (_, hi)) in [("insert", self.insert_bounds()), ("delete", self.delete_bounds())] {
            if hi > MAX_BATCH_OPERATIONS {
                return Err(BenchError::config(format!(
                    "{name} batches of up to {hi} rows exceed the limit of {MAX_BATCH_OPERATIONS}"
                )));
            }
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            return Err(BenchError::config("jitter must be a finite value >= 0"));
        }
        seconds("duration", self.duration)?;
        seconds("head_start", self.head_start)?;
        if let Some(at) = self.rebuild_after {
            seconds("rebuild_after", at)?;
        }
        if self.writers == 0 {
            return Err(BenchError::config("writers must be > 0"));
        }
        if self.load_batch == 0 || self.commit_every == 0 {
            return Err(BenchError::config("load_batch and commit_every must be > 0"));
        }
        for (name, pause) in [("generator_pause", self.generator_pause), ("sampler_pause", self.sampler_pause)] {
            if pause.min_ms > pause.max_ms {
                return Err(BenchError::config(format!("{name} range is inverted")));
            }
        }
        if let Backoff::Exponential { initial_ms, max_ms } = self.retry.backoff {
            if initial_ms == 0 || initial_ms > max_ms {
                return Err(BenchError::config("exponential backoff needs 0 < initial_ms <= max_ms"));
            }
        }
        if !self.index_type.is_nns() {
            return Err(BenchError::config(format!(
                "{} cannot serve nearest-neighbor queries",
                self.index_type
            )));
        }
        Ok(())
    }

    /// Out-of-range values saturate; [`RunConfig::validate`] rejects them.
    pub fn duration(&self) -> Duration {
        seconds("duration", self.duration).unwrap_or(Duration::MAX)
    }

    pub fn head_start(&self) -> Duration {
        seconds("head_start", self.head_start).unwrap_or(Duration::MAX)
    }

    /// Offset of the rebuild trigger, if it fires within the run.
    pub fn rebuild_offset(&self) -> Option<Duration> {
        self.rebuild_after
            .filter(|at| *at < self.duration)
            .map(|at| seconds("rebuild_after", at).unwrap_or(Duration::MAX))
    }

    pub fn index_poll_interval(&self) -> Duration {
        Duration::from_millis(self.index_poll_interval_ms)
    }

    pub fn insert_bounds(&self) -> (u64, u64) {
        self.operation_bounds.scaled(self.insert_ratio)
    }

    pub fn delete_bounds(&self) -> (u64, u64) {
        self.operation_bounds.scaled(self.delete_ratio)
    }

    /// Name of the benchmarked index.
    pub fn index_name(&self) -> String {
        format!("idx_{}_{}", self.vector_column, self.index_type.as_str().to_ascii_lowercase())
    }
}

fn seconds(name: &str, secs: f64) -> BenchResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| BenchError::config(format!("{name} must be a representable number of seconds >= 0: {e}")))
}
