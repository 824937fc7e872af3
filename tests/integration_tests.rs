//! End-to-end tests across the churnbench crates
//!
//! - `.fbin` datasets → preparation → MemoryStore
//! - adaptiveness runs through every phase, with export
//! - index-quality sweep
//!
//! Run with: cargo test --test integration_tests

use churnbench_core::config::{PauseRange, QueryFeed, RunConfig};
use churnbench_core::driver::{AdaptivenessRun, RunPhase};
use churnbench_core::export::{MEASUREMENTS_FILE, RUN_FILE};
use churnbench_core::{run_adaptiveness, run_quality, BenchError, MeasurementSeries, RunContext, SweepConfig};
use churnbench_dataset::synthetic::clustered;
use churnbench_dataset::{write_fbin, DatasetOpener, FbinOpener, InMemoryDataset};
use churnbench_store::{index_states, IndexState, IndexType, MemoryStore, VectorStore};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const DIM: usize = 8;

fn small_config(name: &str) -> RunConfig {
    RunConfig {
        name: Some(name.to_string()),
        entity: "it.adaptive".into(),
        dimension: DIM,
        corpus_size: 1_000,
        load_batch: 128,
        commit_every: 400,
        k: 10,
        index_type: IndexType::Pq,
        index_poll_interval_ms: 5,
        generator_pause: PauseRange::new(1, 10),
        sampler_pause: PauseRange::new(5, 15),
        operation_bounds: churnbench_core::OperationBounds { min: 10, max: 50 },
        ..RunConfig::default()
    }
}

fn write_datasets(dir: &Path) -> (Arc<dyn DatasetOpener>, Arc<dyn DatasetOpener>) {
    let mut vectors = clustered(5_064, DIM, 16, 42);
    let queries = vectors.split_off(5_000);
    let base = dir.join("base.fbin");
    let query = dir.join("query.fbin");
    write_fbin(&base, DIM, &vectors).unwrap();
    write_fbin(&query, DIM, &queries).unwrap();
    (Arc::new(FbinOpener::new(base, DIM)), Arc::new(FbinOpener::new(query, DIM)))
}

// ============================================================================
// Adaptiveness runs
// ============================================================================

#[tokio::test]
async fn test_fbin_run_with_rebuild_exports_results() {
    let dir = tempdir().unwrap();
    let (corpus, queries) = write_datasets(dir.path());
    let store = MemoryStore::new();
    let config = RunConfig {
        duration: 0.5,
        rebuild_after: Some(0.2),
        writers: 2,
        ..small_config("fbin-run")
    };
    let ctx = RunContext::new(Arc::new(store.clone()), dir.path(), config, corpus, queries);

    let report = run_adaptiveness(ctx).await.unwrap();
    assert_eq!(report.phase, RunPhase::Done);
    assert!(report.summary.rebuild_fired);
    assert_eq!(store.stats().rebuilds_requested, 1);
    assert!(report.summary.rows > 0);
    assert!(report.summary.counters.inserts_executed > 0);
    assert_eq!(report.summary.loaded, 1_000);

    // Inserts continue right after the preloaded records.
    let expected_rows = 1_000 + report.summary.counters.inserts_executed - report.summary.counters.deletes_executed;
    assert_eq!(store.count("it.adaptive").await.unwrap(), expected_rows);
    assert!(report.summary.counters.max_id >= 1_000 + report.summary.counters.inserts_executed as i64);

    let out = dir.path().join("out/fbin-run");
    assert_eq!(report.output.as_deref(), Some(out.as_path()));
    let text = std::fs::read_to_string(out.join(MEASUREMENTS_FILE)).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    for key in [
        "timestamp",
        "insertsExecuted",
        "deletesExecuted",
        "outOfBounds",
        "k",
        "rebuilt",
        "runtimeMs",
        "recall",
        "ndcg",
        "resultCount",
    ] {
        assert_eq!(json[key].as_array().map(Vec::len), Some(report.summary.rows), "column {key}");
    }
    let series: MeasurementSeries = serde_json::from_value(json).unwrap();
    assert!(series.recall.iter().all(|r| (0.0..=1.0).contains(r)));
    assert!(series.k.iter().all(|k| *k == 10));

    let run: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(out.join(RUN_FILE)).unwrap()).unwrap();
    assert_eq!(run["config"]["entity"], "it.adaptive");
    assert_eq!(run["summary"]["rebuildFired"], true);
}

#[tokio::test]
async fn test_zero_duration_run_has_no_rows() {
    let dir = tempdir().unwrap();
    let (corpus, queries) = write_datasets(dir.path());
    let config = RunConfig {
        duration: 0.0,
        rebuild_after: Some(0.0),
        ..small_config("empty")
    };
    let ctx = RunContext::new(Arc::new(MemoryStore::new()), dir.path(), config, corpus, queries);
    let report = run_adaptiveness(ctx).await.unwrap();
    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!(report.summary.rows, 0);
    assert!(!report.summary.rebuild_fired);

    let series: MeasurementSeries =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("out/empty").join(MEASUREMENTS_FILE)).unwrap())
            .unwrap();
    assert!(series.is_empty());
}

#[tokio::test]
async fn test_existing_output_is_not_overwritten() {
    let dir = tempdir().unwrap();
    let (corpus, queries) = write_datasets(dir.path());
    let config = RunConfig {
        duration: 0.0,
        ..small_config("twice")
    };
    let ctx = RunContext::new(Arc::new(MemoryStore::new()), dir.path(), config, corpus, queries);
    run_adaptiveness(ctx.clone()).await.unwrap();
    let before = std::fs::read_to_string(dir.path().join("out/twice").join(RUN_FILE)).unwrap();

    let err = run_adaptiveness(ctx).await.unwrap_err();
    assert!(matches!(err, BenchError::Export { .. }), "{err}");
    let after = std::fs::read_to_string(dir.path().join("out/twice").join(RUN_FILE)).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_batches_respect_scaled_bounds() {
    let dir = tempdir().unwrap();
    let (corpus, queries) = write_datasets(dir.path());
    let config = RunConfig {
        duration: 0.3,
        insert_ratio: 0.5,
        delete_ratio: 0.0,
        ..small_config("bounds")
    };
    let ctx = RunContext::new(Arc::new(MemoryStore::new()), dir.path(), config, corpus, queries);
    let report = AdaptivenessRun::new(ctx).execute().await.unwrap();

    let inserts = report.summary.inserts;
    assert!(inserts.batches > 0);
    assert!(inserts.rows >= inserts.batches * 5, "{inserts:?}");
    assert!(inserts.rows <= inserts.batches * 25, "{inserts:?}");
    assert_eq!(report.summary.counters.deletes_executed, 0);
}

#[tokio::test]
async fn test_inserted_feed_queries_fresh_vectors() {
    let dir = tempdir().unwrap();
    let (corpus, queries) = write_datasets(dir.path());
    let config = RunConfig {
        duration: 0.4,
        query_feed: QueryFeed::Inserted,
        ..small_config("inserted")
    };
    let ctx = RunContext::new(Arc::new(MemoryStore::new()), dir.path(), config, corpus, queries);
    let report = AdaptivenessRun::new(ctx).execute().await.unwrap();
    assert!(report.summary.rows > 0);
    // Fresh inserts are not covered by the index built during preparation.
    assert!(report.series.recall.iter().any(|r| *r < 1.0));
}

#[tokio::test]
async fn test_missing_dataset_fails_preparation() {
    let dir = tempdir().unwrap();
    let corpus: Arc<dyn DatasetOpener> = Arc::new(FbinOpener::new(dir.path().join("missing.fbin"), DIM));
    let queries: Arc<dyn DatasetOpener> = Arc::new(InMemoryDataset::new(DIM, clustered(4, DIM, 2, 1)).unwrap().opener());
    let ctx = RunContext::new(Arc::new(MemoryStore::new()), dir.path(), small_config("missing"), corpus, queries);
    let mut run = AdaptivenessRun::new(ctx);
    assert!(run.execute().await.is_err());
    assert_eq!(run.phase(), RunPhase::Failed);
    assert!(!dir.path().join("out/missing").exists());
}

// ============================================================================
// Index-quality sweep
// ============================================================================

#[tokio::test]
async fn test_quality_sweep_on_fbin_data() {
    let dir = tempdir().unwrap();
    let (corpus, queries) = write_datasets(dir.path());
    let store = MemoryStore::new();
    let config = RunConfig {
        index_type: IndexType::Vaf,
        ..small_config("sweep")
    };
    let ctx = RunContext::new(Arc::new(store.clone()), dir.path(), config, corpus, queries);
    let report = run_quality(
        &ctx,
        &SweepConfig {
            repeat: 4,
            max_k: 64,
            parallelism: 4,
        },
    )
    .await
    .unwrap();

    assert_eq!(report.queries, 4);
    assert_eq!(report.series.len(), 4 * 7);
    approx::assert_relative_eq!(report.series.mean_recall_at(64).unwrap(), 1.0);
    assert_eq!(
        index_states(&store, "it.adaptive").await.unwrap(),
        vec![("it.adaptive.idx_feature_vaf".to_string(), IndexState::Clean)]
    );
    assert!(dir.path().join("out/sweep/data.json").exists());
    assert!(dir.path().join("out/sweep/plan.json").exists());
}
