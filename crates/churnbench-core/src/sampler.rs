//! The benchmark sampler and run clock.
//!
//! Until the deadline passes, each iteration draws a query vector, runs it once
//! against the benchmarked index and once as an exact scan inside a read-only
//! transaction, and appends a [`MeasurementRow`]. An iteration that fails is
//! logged, counted, and produces no row. When the loop ends the sampler clears
//! the run signal, which starts DRAIN.

use crate::config::{QueryFeed, RunConfig};
use crate::error::BenchResult;
use crate::feed::QueryQueue;
use crate::measures;
use crate::recorder::{MeasurementRow, MeasurementSeries};
use crate::signal::RunSignal;
use crate::state::MutationState;
use churnbench_dataset::{DatasetError, DatasetOpener, DatasetSource};
use churnbench_store::{Query, StoreResult, TxId, TxMode, VectorStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Where query vectors come from.
pub enum QuerySupply {
    /// Replays a dataset, reopening it whenever it runs out.
    Dataset {
        opener: Arc<dyn DatasetOpener>,
        current: Option<Box<dyn DatasetSource>>,
    },
    /// Vectors the insert generators offered after committing them.
    Inserted(Arc<QueryQueue>),
}

impl QuerySupply {
    pub fn for_feed(feed: QueryFeed, opener: Arc<dyn DatasetOpener>, queue: Arc<QueryQueue>) -> Self {
        match feed {
            QueryFeed::Dataset => QuerySupply::Dataset { opener, current: None },
            QueryFeed::Inserted => QuerySupply::Inserted(queue),
        }
    }

    /// Next query vector, or `None` when the inserted-vector queue is empty.
    pub fn next_vector(&mut self) -> BenchResult<Option<Vec<f32>>> {
        match self {
            QuerySupply::Inserted(queue) => Ok(queue.poll()),
            QuerySupply::Dataset { opener, current } => {
                let needs_reopen = current.as_ref().map_or(true, |s| !s.has_next());
                if needs_reopen {
                    let reopened = opener.open()?;
                    if !reopened.has_next() {
                        return Err(DatasetError::Exhausted.into());
                    }
                    *current = Some(reopened);
                }
                match current {
                    Some(source) => Ok(Some(source.next_record()?.1)),
                    None => Err(DatasetError::Exhausted.into()),
                }
            }
        }
    }
}

/// Outcome of the sampler loop.
#[derive(Debug, Default)]
pub struct SamplerReport {
    pub series: MeasurementSeries,
    pub iterations: u64,
    pub failed: u64,
    pub skipped: u64,
    pub elapsed: Duration,
}

pub struct Sampler {
    store: Arc<dyn VectorStore>,
    config: Arc<RunConfig>,
    state: Arc<MutationState>,
    supply: QuerySupply,
    signal: RunSignal,
    rng: StdRng,
}

impl Sampler {
    pub fn new(
        store: Arc<dyn VectorStore>,
        config: Arc<RunConfig>,
        state: Arc<MutationState>,
        supply: QuerySupply,
        signal: RunSignal,
        seed: u64,
    ) -> Self {
        Self {
            store,
            config,
            state,
            supply,
            signal,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Samples until `config.duration` has elapsed since `start`, then stops the
    /// run signal.
    pub async fn run(mut self, start: Instant) -> SamplerReport {
        let duration = self.config.duration();
        let mut report = SamplerReport::default();

        while start.elapsed() < duration {
            report.iterations += 1;
            let elapsed = start.elapsed();
            match self.sample(elapsed).await {
                Ok(Some(row)) => report.series.push(row),
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        entity = %self.config.entity,
                        op = "sample",
                        elapsed_secs = elapsed.as_secs(),
                        error = %err,
                        "sample failed; continuing"
                    );
                }
            }

            let pause = self.config.sampler_pause.sample(&mut self.rng);
            let remaining = duration.saturating_sub(start.elapsed());
            tokio::time::sleep(pause.min(remaining)).await;
        }

        report.elapsed = start.elapsed();
        self.signal.stop();
        tracing::info!(
            rows = report.series.len(),
            failed = report.failed,
            skipped = report.skipped,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "sampler finished"
        );
        report
    }

    /// One iteration. `Ok(None)` means no query vector was available.
    pub async fn sample(&mut self, elapsed: Duration) -> BenchResult<Option<MeasurementRow>> {
        let Some(vector) = self.supply.next_vector()? else {
            return Ok(None);
        };
        let tx = self.store.begin_transaction(TxMode::ReadOnly).await?;
        let measured = measure(self.store.as_ref(), &self.config, tx, vector).await;
        let finished = match &measured {
            Ok(_) => self.store.commit(tx).await,
            Err(_) => self.store.rollback(tx).await,
        };
        let (runtime, results, groundtruth) = measured?;
        finished?;

        let k = self.config.k;
        let counters = self.state.snapshot();
        Ok(Some(MeasurementRow {
            timestamp: elapsed.as_secs() as i64,
            inserts_executed: counters.inserts_executed,
            deletes_executed: counters.deletes_executed,
            out_of_bounds: counters.out_of_bounds,
            k,
            rebuilt: counters.index_rebuilt,
            runtime_ms: runtime.as_secs_f64() * 1000.0,
            recall: measures::recall(&groundtruth, &results, k),
            ndcg: measures::ndcg(&groundtruth, &results, k),
            result_count: results.len(),
        }))
    }
}

/// Runs the indexed query and its exact-scan counterpart. Returns the indexed
/// query latency and both id lists.
async fn measure(
    store: &dyn VectorStore,
    config: &RunConfig,
    tx: TxId,
    vector: Vec<f32>,
) -> StoreResult<(Duration, Vec<i64>, Vec<i64>)> {
    let query = Query::nns(&config.entity, &config.vector_column, vector, config.k)
        .parallelism(config.parallelism)
        .tx(tx);

    let indexed = query.clone().use_index_type(config.index_type);
    let started = Instant::now();
    let results = store.query(&indexed).await?;
    let runtime = started.elapsed();

    let exact = query.disallow_index();
    let groundtruth = store.query(&exact).await?;

    Ok((
        runtime,
        results.into_iter().map(|r| r.id).collect(),
        groundtruth.into_iter().map(|r| r.id).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use churnbench_dataset::InMemoryDataset;
    use churnbench_store::{BatchInsert, ColumnDef, CreateIndex, IndexType, MemoryStore};

    const ENTITY: &str = "bench.sampler";

    fn config(duration: f64) -> Arc<RunConfig> {
        Arc::new(RunConfig {
            entity: ENTITY.into(),
            dimension: 2,
            duration,
            k: 3,
            index_type: IndexType::Vaf,
            sampler_pause: crate::config::PauseRange::new(1, 5),
            ..RunConfig::default()
        })
    }

    async fn loaded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_entity(ENTITY, &[ColumnDef::long("id"), ColumnDef::float_vector("feature", 2)])
            .await
            .unwrap();
        let rows = (1..=20).map(|i| (i, vec![i as f32, 0.0])).collect();
        store
            .batch_insert(&BatchInsert::new(ENTITY, "id", "feature").rows(rows))
            .await
            .unwrap();
        store
            .create_index(&CreateIndex::new(ENTITY, "feature", IndexType::Vaf))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
    }

    fn queries() -> Arc<dyn DatasetOpener> {
        Arc::new(InMemoryDataset::new(2, vec![vec![3.0, 0.0], vec![10.0, 0.0]]).unwrap().opener())
    }

    fn sampler(store: MemoryStore, duration: f64, supply: QuerySupply) -> (Sampler, RunSignal) {
        let signal = RunSignal::new();
        let sampler = Sampler::new(
            Arc::new(store),
            config(duration),
            Arc::new(MutationState::new()),
            supply,
            signal.clone(),
            1,
        );
        (sampler, signal)
    }

    #[tokio::test]
    async fn zero_duration_emits_nothing_and_stops_the_run() {
        let (s, signal) = sampler(
            loaded_store().await,
            0.0,
            QuerySupply::Dataset { opener: queries(), current: None },
        );
        let report = s.run(Instant::now()).await;
        assert_eq!(report.iterations, 0);
        assert!(report.series.is_empty());
        assert!(!signal.is_running());
    }

    #[tokio::test]
    async fn clean_index_scores_perfectly() {
        let (mut s, _) = sampler(
            loaded_store().await,
            1.0,
            QuerySupply::Dataset { opener: queries(), current: None },
        );
        let row = s.sample(Duration::from_millis(1500)).await.unwrap().unwrap();
        assert_eq!(row.timestamp, 1);
        assert_eq!(row.recall, 1.0);
        assert_eq!(row.result_count, 3);
        assert_eq!(row.k, 3);
    }

    #[tokio::test]
    async fn query_dataset_wraps_around() {
        let mut supply = QuerySupply::Dataset { opener: queries(), current: None };
        let drawn: Vec<Vec<f32>> = (0..5).map(|_| supply.next_vector().unwrap().unwrap()).collect();
        assert_eq!(drawn[0], drawn[2]);
        assert_eq!(drawn[1], drawn[3]);
        assert_eq!(drawn[0], drawn[4]);
    }

    #[tokio::test]
    async fn failed_iterations_emit_no_rows() {
        let store = loaded_store().await;
        store.drop_entity(ENTITY).await.unwrap();
        let (s, _) = sampler(store, 0.05, QuerySupply::Dataset { opener: queries(), current: None });
        let report = s.run(Instant::now()).await;
        assert!(report.iterations > 0);
        assert_eq!(report.failed, report.iterations);
        assert!(report.series.is_empty());
    }

    #[tokio::test]
    async fn empty_inserted_queue_skips() {
        let queue = Arc::new(QueryQueue::default());
        let (mut s, _) = sampler(loaded_store().await, 1.0, QuerySupply::Inserted(queue.clone()));
        assert!(s.sample(Duration::ZERO).await.unwrap().is_none());
        queue.offer(vec![5.0, 0.0]);
        assert!(s.sample(Duration::ZERO).await.unwrap().is_some());
    }
}
