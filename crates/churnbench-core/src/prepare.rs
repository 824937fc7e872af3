//! PREPARE: fresh entity, bulk load, index build.
//!
//! ```text
//! drop entity (NotFound ok) -> create entity
//!   -> begin tx -> insert load_batch rows ... (commit + begin every commit_every rows) -> commit
//!   -> create index -> poll about_entity until the index is CLEAN
//! ```
//!
//! Every failure here is fatal. A failed load rolls back the open transaction.

use crate::context::RunContext;
use crate::error::{BenchError, BenchResult};
use crate::feed::SharedSource;
use crate::state::{FeatureStatistics, MutationState};
use churnbench_dataset::DatasetSource;
use churnbench_store::{
    index_states, BatchInsert, ColumnDef, CreateIndex, IndexHandle, IndexState, StoreError, TxId, TxMode,
    VectorStore,
};
use std::time::Instant;

/// Result of a successful preparation.
pub struct Prepared {
    /// Corpus source positioned after the preloaded records.
    pub source: SharedSource,
    pub stats: FeatureStatistics,
    pub state: MutationState,
    pub index: IndexHandle,
    pub loaded: u64,
}

pub async fn prepare(ctx: &RunContext) -> BenchResult<Prepared> {
    let config = &ctx.config;
    let store = ctx.store.as_ref();
    if !config.index_type.is_nns() {
        return Err(BenchError::Prepare(format!(
            "{} cannot serve nearest-neighbor queries",
            config.index_type
        )));
    }

    match store.drop_entity(&config.entity).await {
        Ok(()) => tracing::info!(entity = %config.entity, "dropped existing entity"),
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(prepare_err("dropping entity", err)),
    }
    store
        .create_entity(
            &config.entity,
            &[
                ColumnDef::long(&config.id_column),
                ColumnDef::float_vector(&config.vector_column, config.dimension),
            ],
        )
        .await
        .map_err(|e| prepare_err("creating entity", e))?;

    let mut source = ctx.corpus.open()?;
    if source.dimension() != config.dimension {
        return Err(BenchError::Prepare(format!(
            "corpus has dimension {}, run expects {}",
            source.dimension(),
            config.dimension
        )));
    }

    let started = Instant::now();
    let mut stats = FeatureStatistics::new(config.dimension);
    let loaded = bulk_load(ctx, source.as_mut(), &mut stats).await?;
    let state = MutationState::with_max_id(loaded as i64);
    tracing::info!(
        entity = %config.entity,
        rows = loaded,
        secs = started.elapsed().as_secs_f64(),
        "corpus loaded"
    );

    let index = build_index(ctx).await?;
    Ok(Prepared {
        source: SharedSource::new(source),
        stats,
        state,
        index,
        loaded,
    })
}

fn prepare_err(step: &str, err: StoreError) -> BenchError {
    BenchError::Prepare(format!("{step}: {err}"))
}

/// Loads `corpus_size` records in one logical transaction, committing every
/// `commit_every` rows. Returns the number of rows loaded.
async fn bulk_load(ctx: &RunContext, source: &mut dyn DatasetSource, stats: &mut FeatureStatistics) -> BenchResult<u64> {
    let config = &ctx.config;
    let store = ctx.store.as_ref();
    if config.corpus_size == 0 {
        return Ok(0);
    }

    let mut tx = store
        .begin_transaction(TxMode::ReadWrite)
        .await
        .map_err(|e| prepare_err("opening load transaction", e))?;
    let mut loaded = 0u64;
    let mut since_commit = 0u64;

    while loaded < config.corpus_size {
        let want = (config.corpus_size - loaded).min(config.load_batch as u64) as usize;
        let result = load_batch(store, config, tx, source, want, stats).await;
        let rows = match result {
            Ok(rows) => rows,
            Err(err) => return Err(abort_load(store, tx, loaded, err).await),
        };
        loaded += rows;
        since_commit += rows;

        if since_commit >= config.commit_every && loaded < config.corpus_size {
            if let Err(err) = store.commit(tx).await {
                return Err(abort_load(store, tx, loaded, prepare_err("intermediate commit", err)).await);
            }
            tracing::debug!(rows = loaded, "intermediate commit");
            tx = store
                .begin_transaction(TxMode::ReadWrite)
                .await
                .map_err(|e| prepare_err("reopening load transaction", e))?;
            since_commit = 0;
        }
    }

    store
        .commit(tx)
        .await
        .map_err(|e| prepare_err("committing load transaction", e))?;
    Ok(loaded)
}

async fn load_batch(
    store: &dyn VectorStore,
    config: &crate::config::RunConfig,
    tx: TxId,
    source: &mut dyn DatasetSource,
    want: usize,
    stats: &mut FeatureStatistics,
) -> BenchResult<u64> {
    let records = source.next_batch(want)?;
    if records.len() < want {
        return Err(BenchError::Prepare(format!(
            "corpus ran out after {} of {} records",
            source.size().min(config.corpus_size),
            config.corpus_size
        )));
    }
    for (_, vector) in &records {
        stats.observe(vector);
    }
    let insert = BatchInsert::new(&config.entity, &config.id_column, &config.vector_column)
        .rows(records)
        .tx(tx);
    store
        .batch_insert(&insert)
        .await
        .map_err(|e| prepare_err("bulk insert", e))
}

async fn abort_load(store: &dyn VectorStore, tx: TxId, loaded: u64, err: BenchError) -> BenchError {
    tracing::error!(rows = loaded, error = %err, "bulk load failed; rolling back");
    if let Err(rollback) = store.rollback(tx).await {
        tracing::warn!(tx, error = %rollback, "rollback failed");
    }
    err
}

/// Creates the benchmarked index and blocks until it reports `CLEAN`.
///
/// Polls at `index_poll_interval` with no overall timeout.
async fn build_index(ctx: &RunContext) -> BenchResult<IndexHandle> {
    let config = &ctx.config;
    let store = ctx.store.as_ref();
    let request = CreateIndex::new(&config.entity, &config.vector_column, config.index_type).name(config.index_name());
    let handle = store
        .create_index(&request)
        .await
        .map_err(|e| prepare_err("creating index", e))?;
    tracing::info!(index = %handle, index_type = %config.index_type, params = ?request.params, "index build started");

    let wanted = handle.to_string();
    let started = Instant::now();
    loop {
        let states = index_states(store, &config.entity)
            .await
            .map_err(|e| prepare_err("polling index state", e))?;
        match states.iter().find(|(name, _)| *name == wanted) {
            Some((_, IndexState::Clean)) => break,
            Some((_, IndexState::Stale)) => {}
            None => {
                return Err(BenchError::Prepare(format!("index {wanted} disappeared while building")));
            }
        }
        tracing::info!(index = %handle, waited_secs = started.elapsed().as_secs(), "index not ready yet");
        tokio::time::sleep(config.index_poll_interval()).await;
    }
    tracing::info!(index = %handle, secs = started.elapsed().as_secs_f64(), "index ready");
    Ok(handle)
}
