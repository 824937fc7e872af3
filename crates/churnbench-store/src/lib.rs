//! Churnbench store contract
//!
//! The benchmark engine talks to a vector-searchable store only through the
//! [`VectorStore`] trait. Backends implement it behind an `Arc<dyn VectorStore>`;
//! this crate ships [`MemoryStore`], an in-process reference backend whose
//! approximate indexes go stale under mutation the way real ones do.
//!
//! ```text
//!                 ┌────────────────────────────────────────────┐
//!  engine ───────►│ VectorStore (async)                        │
//!                 │  tx:      begin / commit / rollback        │
//!                 │  schema:  create_entity / drop_entity      │
//!                 │  index:   create_index / rebuild_index     │
//!                 │  write:   batch_insert / delete            │
//!                 │  read:    query / explain / about / count  │
//!                 └───────────────┬────────────────────────────┘
//!                                 │
//!                         ┌───────▼──────┐
//!                         │ MemoryStore  │
//!                         └──────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod query;
pub mod types;

use async_trait::async_trait;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, StoreStats};
pub use query::{Direction, Distance, DistanceSpec, IndexHint, Query};
pub use types::{
    BatchInsert, ColumnDef, ColumnType, CreateIndex, Delete, IndexHandle, IndexParams, IndexState,
    IndexType, PlanStep, Predicate, RebuildMode, ResultRow, Row, StatusClass, StatusRow, TxId, TxMode,
};

/// Operations the benchmark engine needs from a backing store.
///
/// Mutations accept an optional transaction; without one they commit on their
/// own. `drop_entity` reports [`StoreError::NotFound`] for missing entities and
/// `batch_insert`/`delete` may fail with [`StoreError::ResourceExhausted`] under
/// contention, which callers treat as retryable.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn begin_transaction(&self, mode: TxMode) -> StoreResult<TxId>;

    async fn commit(&self, tx: TxId) -> StoreResult<()>;

    async fn rollback(&self, tx: TxId) -> StoreResult<()>;

    async fn create_entity(&self, entity: &str, columns: &[ColumnDef]) -> StoreResult<()>;

    async fn drop_entity(&self, entity: &str) -> StoreResult<()>;

    async fn create_index(&self, request: &CreateIndex) -> StoreResult<IndexHandle>;

    /// Rebuilds `index`. With [`RebuildMode::Async`] the call returns as soon as
    /// the rebuild is scheduled.
    async fn rebuild_index(&self, index: &IndexHandle, mode: RebuildMode) -> StoreResult<()>;

    /// Inserts the batch and returns the number of rows written.
    async fn batch_insert(&self, insert: &BatchInsert) -> StoreResult<u64>;

    /// Deletes matching rows and returns how many were removed.
    async fn delete(&self, delete: &Delete) -> StoreResult<u64>;

    async fn query(&self, query: &Query) -> StoreResult<Vec<ResultRow>>;

    async fn explain(&self, query: &Query) -> StoreResult<Vec<PlanStep>>;

    async fn about_entity(&self, entity: &str) -> StoreResult<Vec<StatusRow>>;

    async fn count(&self, entity: &str) -> StoreResult<u64>;
}

/// Current state of every index on `entity`, as reported by
/// [`VectorStore::about_entity`].
pub async fn index_states(store: &dyn VectorStore, entity: &str) -> StoreResult<Vec<(String, IndexState)>> {
    let rows = store.about_entity(entity).await?;
    rows.into_iter()
        .filter(|row| row.class == StatusClass::Index)
        .map(|row| {
            let state = row.info.parse::<IndexState>().map_err(StoreError::Internal)?;
            Ok((row.name, state))
        })
        .collect()
}
