//! Index-quality sweep.
//!
//! No concurrent mutation: for `repeat` query vectors, the exact and the
//! indexed query are each run once with `limit = max_k`, and recall/nDCG are
//! evaluated at every power-of-two level up to `max_k`.
//!
//! ```text
//! <out>/data.json   { "level": [..], "recall": [..], "ndcg": [..] }
//! <out>/plan.json   explain output of the first indexed query
//! ```

use crate::context::RunContext;
use crate::error::{BenchError, BenchResult};
use crate::export::write_json_new;
use crate::measures::Quality;
use crate::prepare::prepare;
use churnbench_dataset::DatasetSource;
use churnbench_store::{PlanStep, Query, StoreResult, VectorStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATA_FILE: &str = "data.json";
pub const PLAN_FILE: &str = "plan.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Number of query vectors.
    pub repeat: usize,
    /// Result limit of both queries; the largest evaluated level.
    pub max_k: usize,
    pub parallelism: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            repeat: 100,
            max_k: 1000,
            parallelism: 32,
        }
    }
}

/// `1, 2, 4, ...` up to and including the largest power of two `<= max_k`.
pub fn levels(max_k: usize) -> Vec<usize> {
    std::iter::successors(Some(1usize), |l| l.checked_mul(2))
        .take_while(|l| *l <= max_k)
        .collect()
}

/// Column-oriented sweep output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySeries {
    pub level: Vec<usize>,
    pub recall: Vec<f64>,
    pub ndcg: Vec<f64>,
}

impl QualitySeries {
    pub fn push(&mut self, level: usize, quality: Quality) {
        self.level.push(level);
        self.recall.push(quality.recall);
        self.ndcg.push(quality.ndcg);
    }

    pub fn len(&self) -> usize {
        self.level.len()
    }

    pub fn is_empty(&self) -> bool {
        self.level.is_empty()
    }

    /// Mean recall over all rows at `level`.
    pub fn mean_recall_at(&self, level: usize) -> Option<f64> {
        let at: Vec<f64> = self
            .level
            .iter()
            .zip(&self.recall)
            .filter(|(l, _)| **l == level)
            .map(|(_, r)| *r)
            .collect();
        (!at.is_empty()).then(|| at.iter().sum::<f64>() / at.len() as f64)
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub series: QualitySeries,
    pub plan: Vec<PlanStep>,
    pub queries: usize,
    pub output: Option<PathBuf>,
}

/// Runs the sweep against the entity named in `ctx.config`, which must already
/// carry a clean index of `ctx.config.index_type`.
pub async fn sweep(ctx: &RunContext, sweep: &SweepConfig) -> (SweepReport, BenchResult<()>) {
    let mut report = SweepReport::default();
    let result = sweep_into(ctx, sweep, &mut report).await;
    (report, result)
}

async fn sweep_into(ctx: &RunContext, sweep: &SweepConfig, report: &mut SweepReport) -> BenchResult<()> {
    if sweep.max_k == 0 {
        return Err(BenchError::config("max_k must be > 0"));
    }
    let config = &ctx.config;
    let store = ctx.store.as_ref();
    let levels = levels(sweep.max_k);
    let mut queries = ctx.queries.open()?;

    for n in 0..sweep.repeat {
        let vector = match queries.has_next() {
            true => queries.next_record()?.1,
            false => {
                tracing::warn!(wanted = sweep.repeat, got = n, "query dataset exhausted");
                break;
            }
        };
        let base = Query::nns(&config.entity, &config.vector_column, vector, sweep.max_k).parallelism(sweep.parallelism);
        let indexed = base.clone().use_index_type(config.index_type);
        if n == 0 {
            report.plan = store.explain(&indexed).await?;
        }
        let groundtruth = ids(store, &base.disallow_index()).await?;
        let results = ids(store, &indexed).await?;
        for level in &levels {
            report.series.push(*level, Quality::compute(&groundtruth, &results, *level));
        }
        report.queries += 1;
        tracing::debug!(query = n, results = results.len(), "sweep query done");
    }
    Ok(())
}

async fn ids(store: &dyn VectorStore, query: &Query) -> StoreResult<Vec<i64>> {
    Ok(store.query(query).await?.into_iter().map(|r| r.id).collect())
}

/// Writes `data.json` and `plan.json` into `dir`.
pub fn export_sweep(report: &SweepReport, dir: &Path) -> BenchResult<()> {
    write_json_new(&dir.join(DATA_FILE), "quality series", &report.series)?;
    write_json_new(&dir.join(PLAN_FILE), "query plan", &report.plan)
}

/// Prepares a fresh entity and index, sweeps, and exports. Partial results are
/// exported even when the sweep fails part way.
pub async fn run_quality(ctx: &RunContext, config: &SweepConfig) -> BenchResult<SweepReport> {
    let prepared = prepare(ctx).await?;
    tracing::info!(index = %prepared.index, repeat = config.repeat, max_k = config.max_k, "index-quality sweep started");

    let (mut report, swept) = sweep(ctx, config).await;
    let dir = ctx.output_dir();
    let exported = export_sweep(&report, &dir);
    swept?;
    exported?;
    report.output = Some(dir.clone());
    tracing::info!(
        dir = %dir.display(),
        queries = report.queries,
        recall_at_max = ?levels(config.max_k).last().and_then(|l| report.series.mean_recall_at(*l)),
        "index-quality sweep exported"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use churnbench_dataset::synthetic::clustered;
    use churnbench_dataset::InMemoryDataset;
    use churnbench_store::{IndexType, MemoryStore};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn power_of_two_levels() {
        assert_eq!(levels(0), Vec::<usize>::new());
        assert_eq!(levels(1), vec![1]);
        assert_eq!(levels(10), vec![1, 2, 4, 8]);
        assert_eq!(levels(1000).last(), Some(&512));
        assert_eq!(levels(1024).last(), Some(&1024));
    }

    fn context(workdir: &Path, queries: usize) -> RunContext {
        let corpus = InMemoryDataset::new(4, clustered(300, 4, 6, 3)).unwrap();
        let queries = InMemoryDataset::new(4, clustered(queries, 4, 6, 4)).unwrap();
        RunContext::new(
            Arc::new(MemoryStore::new()),
            workdir,
            RunConfig {
                name: Some("sweep".into()),
                entity: "bench.quality".into(),
                dimension: 4,
                corpus_size: 300,
                index_type: IndexType::IvfPq,
                index_poll_interval_ms: 5,
                ..RunConfig::default()
            },
            Arc::new(corpus.opener()),
            Arc::new(queries.opener()),
        )
    }

    #[tokio::test]
    async fn fresh_index_sweep_is_exact_and_exported() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path(), 5);
        let config = SweepConfig {
            repeat: 3,
            max_k: 16,
            parallelism: 2,
        };
        let report = run_quality(&ctx, &config).await.unwrap();
        assert_eq!(report.queries, 3);
        assert_eq!(report.series.len(), 3 * 5);
        assert!(report.series.recall.iter().all(|r| *r == 1.0));
        assert!(report.plan.iter().any(|s| s.designation.starts_with("IndexScan")));

        let out = dir.path().join("out/sweep");
        assert_eq!(report.output.as_deref(), Some(out.as_path()));
        let text = std::fs::read_to_string(out.join(DATA_FILE)).unwrap();
        let series: QualitySeries = serde_json::from_str(&text).unwrap();
        assert_eq!(series, report.series);
        assert!(out.join(PLAN_FILE).exists());
    }

    #[tokio::test]
    async fn short_query_set_stops_early() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path(), 2);
        let config = SweepConfig {
            repeat: 10,
            max_k: 4,
            parallelism: 1,
        };
        let report = run_quality(&ctx, &config).await.unwrap();
        assert_eq!(report.queries, 2);
        assert_eq!(report.series.level, vec![1, 2, 4, 1, 2, 4]);
    }

    #[tokio::test]
    async fn missing_entity_fails_without_rows() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path(), 2);
        let (report, result) = sweep(&ctx, &SweepConfig::default()).await;
        assert!(matches!(result, Err(BenchError::Store(_))));
        assert!(report.series.is_empty());
    }
}
