//! Insert and delete generators.
//!
//! Each generator is a loop on its own task:
//!
//! ```text
//!   while running:
//!       size  <- uniform[min * ratio, max * ratio]
//!       batch <- insert: next `size` records (source lock) + jitter + OOB check
//!                delete: `size` unclaimed ids from [1, max_id]
//!       submit (retry on ResourceExhausted; other errors abandon the batch)
//!       on success: update MutationState
//!       sleep uniform[generator_pause]
//! ```

use crate::config::RunConfig;
use crate::feed::{QueryQueue, SharedSource};
use crate::retry::{submit_with_retry, Submission};
use crate::signal::RunSignal;
use crate::state::{FeatureStatistics, MutationState};
use churnbench_store::{BatchInsert, Delete, Predicate, VectorStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    Insert,
    Delete,
}

impl GeneratorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorKind::Insert => "insert",
            GeneratorKind::Delete => "delete",
        }
    }
}

/// What one generator did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GeneratorReport {
    pub batches: u64,
    pub rows: u64,
    pub abandoned: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub skipped: u64,
}

impl GeneratorReport {
    pub fn merge(&mut self, other: &GeneratorReport) {
        self.batches += other.batches;
        self.rows += other.rows;
        self.abandoned += other.abandoned;
        self.cancelled += other.cancelled;
        self.retries += other.retries;
        self.skipped += other.skipped;
    }
}

/// Handles shared by every generator of a run.
#[derive(Clone)]
pub struct GeneratorEnv {
    pub store: Arc<dyn VectorStore>,
    pub config: Arc<RunConfig>,
    pub state: Arc<MutationState>,
    pub stats: Arc<FeatureStatistics>,
    pub signal: RunSignal,
}

/// Draws a batch size from `[lo, hi]`.
pub fn batch_size<R: Rng + ?Sized>(rng: &mut R, (lo, hi): (u64, u64)) -> u64 {
    if hi <= lo {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}

// ============================================================================
// Insert
// ============================================================================

pub struct InsertGenerator {
    worker: usize,
    env: GeneratorEnv,
    source: SharedSource,
    feed: Option<Arc<QueryQueue>>,
    rng: StdRng,
    exhausted: bool,
}

impl InsertGenerator {
    pub fn new(
        worker: usize,
        env: GeneratorEnv,
        source: SharedSource,
        feed: Option<Arc<QueryQueue>>,
        seed: u64,
    ) -> Self {
        Self {
            worker,
            env,
            source,
            feed,
            rng: StdRng::seed_from_u64(seed),
            exhausted: false,
        }
    }

    pub async fn run(mut self) -> GeneratorReport {
        let mut report = GeneratorReport::default();
        while self.env.signal.is_running() {
            self.step(&mut report).await;
            let pause = self.env.config.generator_pause.sample(&mut self.rng);
            if !self.env.signal.sleep(pause).await {
                break;
            }
        }
        tracing::debug!(worker = self.worker, op = "insert", ?report, "generator stopped");
        report
    }

    /// One iteration: build a batch and submit it.
    pub async fn step(&mut self, report: &mut GeneratorReport) {
        let size = batch_size(&mut self.rng, self.env.config.insert_bounds()) as usize;
        if size == 0 || self.exhausted {
            report.skipped += 1;
            return;
        }

        let records = match self.source.take(size) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(worker = self.worker, op = "insert", error = %err, "reading insert batch failed");
                report.abandoned += 1;
                return;
            }
        };
        if records.is_empty() {
            tracing::info!(worker = self.worker, op = "insert", "insert source exhausted; generator idles");
            self.exhausted = true;
            report.skipped += 1;
            return;
        }

        let config = &self.env.config;
        let mut insert = BatchInsert::new(&config.entity, &config.id_column, &config.vector_column);
        let mut out_of_bounds = 0u64;
        for (id, mut vector) in records {
            self.env.stats.jitter(&mut vector, config.jitter, &mut self.rng);
            if self.env.stats.is_out_of_bounds(&vector) {
                out_of_bounds += 1;
            }
            insert.append(id, vector);
        }
        self.env.state.record_out_of_bounds(out_of_bounds);

        let store = &self.env.store;
        let outcome = submit_with_retry("insert", &config.retry, &self.env.signal, || store.batch_insert(&insert)).await;
        report.retries += u64::from(outcome.retries());
        match outcome {
            Submission::Done { value, .. } => {
                self.env.state.record_insert(value, insert.max_id());
                report.batches += 1;
                report.rows += value;
                tracing::debug!(worker = self.worker, op = "insert", batch = value, out_of_bounds, "batch committed");
                if let Some(feed) = &self.feed {
                    for (_, vector) in insert.rows {
                        if !feed.offer(vector) {
                            break;
                        }
                    }
                }
            }
            Submission::Failed { error, .. } => {
                tracing::warn!(
                    worker = self.worker,
                    op = "insert",
                    entity = %config.entity,
                    batch = insert.len(),
                    error = %error,
                    "insert batch abandoned"
                );
                report.abandoned += 1;
            }
            Submission::Cancelled { .. } => report.cancelled += 1,
        }
    }
}

// ============================================================================
// Delete
// ============================================================================

pub struct DeleteGenerator {
    worker: usize,
    env: GeneratorEnv,
    rng: StdRng,
}

impl DeleteGenerator {
    pub fn new(worker: usize, env: GeneratorEnv, seed: u64) -> Self {
        Self {
            worker,
            env,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub async fn run(mut self) -> GeneratorReport {
        let mut report = GeneratorReport::default();
        while self.env.signal.is_running() {
            self.step(&mut report).await;
            let pause = self.env.config.generator_pause.sample(&mut self.rng);
            if !self.env.signal.sleep(pause).await {
                break;
            }
        }
        tracing::debug!(worker = self.worker, op = "delete", ?report, "generator stopped");
        report
    }

    pub async fn step(&mut self, report: &mut GeneratorReport) {
        let size = batch_size(&mut self.rng, self.env.config.delete_bounds()) as usize;
        if size == 0 || self.env.state.max_id() == 0 {
            report.skipped += 1;
            return;
        }
        let ids = self.env.state.claim_deletions(size, &mut self.rng);
        if ids.is_empty() {
            report.skipped += 1;
            return;
        }

        let config = &self.env.config;
        let requested = ids.len();
        let delete = Delete::new(&config.entity, Predicate::IdIn(ids));
        let store = &self.env.store;
        let outcome = submit_with_retry("delete", &config.retry, &self.env.signal, || store.delete(&delete)).await;
        report.retries += u64::from(outcome.retries());
        match outcome {
            Submission::Done { value, .. } => {
                self.env.state.record_delete(value);
                report.batches += 1;
                report.rows += value;
                tracing::debug!(worker = self.worker, op = "delete", batch = requested, deleted = value, "batch committed");
            }
            Submission::Failed { error, .. } => {
                tracing::warn!(
                    worker = self.worker,
                    op = "delete",
                    entity = %config.entity,
                    batch = requested,
                    error = %error,
                    "delete batch abandoned"
                );
                report.abandoned += 1;
            }
            Submission::Cancelled { .. } => report.cancelled += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationBounds;
    use churnbench_dataset::InMemoryDataset;
    use churnbench_store::{ColumnDef, MemoryStore};

    const ENTITY: &str = "bench.gen";

    async fn env(store: MemoryStore, config: RunConfig, max_id: i64) -> GeneratorEnv {
        store
            .create_entity(ENTITY, &[ColumnDef::long("id"), ColumnDef::float_vector("feature", 2)])
            .await
            .unwrap();
        GeneratorEnv {
            store: Arc::new(store),
            config: Arc::new(RunConfig {
                entity: ENTITY.into(),
                dimension: 2,
                ..config
            }),
            state: Arc::new(MutationState::with_max_id(max_id)),
            stats: Arc::new(FeatureStatistics::new(2)),
            signal: RunSignal::new(),
        }
    }

    fn source(n: usize) -> SharedSource {
        let vectors = (0..n).map(|i| vec![i as f32, 1.0]).collect();
        SharedSource::new(Box::new(InMemoryDataset::new(2, vectors).unwrap()))
    }

    fn small_bounds() -> RunConfig {
        RunConfig {
            operation_bounds: OperationBounds { min: 10, max: 20 },
            insert_ratio: 1.0,
            delete_ratio: 0.5,
            ..RunConfig::default()
        }
    }

    #[tokio::test]
    async fn insert_step_commits_within_bounds_and_advances_max_id() {
        let store = MemoryStore::new();
        let env = env(store.clone(), small_bounds(), 0).await;
        let feed = Arc::new(QueryQueue::default());
        let mut gen = InsertGenerator::new(0, env.clone(), source(1000), Some(feed.clone()), 1);
        let mut report = GeneratorReport::default();
        gen.step(&mut report).await;

        let rows = env.state.inserts_executed();
        assert!((10..=20).contains(&rows), "{rows}");
        assert_eq!(env.state.max_id(), rows as i64);
        assert_eq!(store.count(ENTITY).await.unwrap(), rows);
        assert_eq!(feed.len() as u64, rows);
        assert_eq!(report.batches, 1);
    }

    #[tokio::test]
    async fn insert_retries_resource_exhaustion() {
        let store = MemoryStore::new();
        store.inject_resource_exhaustion(3);
        let env = env(store.clone(), small_bounds(), 0).await;
        let mut gen = InsertGenerator::new(0, env.clone(), source(100), None, 2);
        let mut report = GeneratorReport::default();
        gen.step(&mut report).await;
        assert_eq!(report.retries, 3);
        assert_eq!(report.batches, 1);
        assert!(env.state.inserts_executed() > 0);
    }

    #[tokio::test]
    async fn exhausted_source_idles() {
        let env = env(MemoryStore::new(), small_bounds(), 0).await;
        let mut gen = InsertGenerator::new(0, env.clone(), source(5), None, 3);
        let mut report = GeneratorReport::default();
        gen.step(&mut report).await;
        gen.step(&mut report).await;
        gen.step(&mut report).await;
        assert_eq!(env.state.inserts_executed(), 5);
        assert_eq!(report.batches, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn out_of_bounds_vectors_are_counted() {
        let env = {
            let mut stats = FeatureStatistics::new(2);
            stats.observe(&[0.0, 1.0]);
            stats.observe(&[3.0, 1.0]);
            GeneratorEnv {
                stats: Arc::new(stats),
                ..env(MemoryStore::new(), small_bounds(), 0).await
            }
        };
        // Ids 1..=4 carry x = 0..=3 and stay in range; everything after is out.
        let mut gen = InsertGenerator::new(0, env.clone(), source(100), None, 4);
        let mut report = GeneratorReport::default();
        gen.step(&mut report).await;
        let rows = env.state.inserts_executed();
        assert_eq!(env.state.snapshot().out_of_bounds, rows - 4);
    }

    #[tokio::test]
    async fn delete_skips_until_something_was_inserted() {
        let env = env(MemoryStore::new(), small_bounds(), 0).await;
        let mut gen = DeleteGenerator::new(0, env.clone(), 5);
        let mut report = GeneratorReport::default();
        gen.step(&mut report).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(env.state.deletes_executed(), 0);
    }

    #[tokio::test]
    async fn delete_step_removes_claimed_rows() {
        let store = MemoryStore::new();
        let env = env(store.clone(), small_bounds(), 0).await;
        let mut ins = InsertGenerator::new(0, env.clone(), source(100), None, 6);
        let mut report = GeneratorReport::default();
        ins.step(&mut report).await;
        let inserted = env.state.inserts_executed();

        let mut del = DeleteGenerator::new(0, env.clone(), 7);
        del.step(&mut report).await;
        let deleted = env.state.deletes_executed();
        assert!((5..=10).contains(&deleted), "{deleted}");
        assert_eq!(env.state.deleted_count() as u64, deleted);
        assert_eq!(store.count(ENTITY).await.unwrap(), inserted - deleted);
    }

    #[tokio::test]
    async fn non_retryable_failure_abandons_batch() {
        let store = MemoryStore::new();
        let env = env(store.clone(), small_bounds(), 0).await;
        store.drop_entity(ENTITY).await.unwrap();
        let mut gen = InsertGenerator::new(0, env.clone(), source(100), None, 8);
        let mut report = GeneratorReport::default();
        gen.step(&mut report).await;
        assert_eq!(report.abandoned, 1);
        assert_eq!(env.state.inserts_executed(), 0);
        assert_eq!(env.state.max_id(), 0);
        assert!(store.count(ENTITY).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn run_loop_stops_on_signal() {
        let env = env(MemoryStore::new(), small_bounds(), 0).await;
        let signal = env.signal.clone();
        let handle = tokio::spawn(InsertGenerator::new(0, env.clone(), source(10_000), None, 9).run());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        signal.stop();
        let report = handle.await.unwrap();
        assert!(report.batches >= 1);
        assert_eq!(report.rows, env.state.inserts_executed());
    }
}
