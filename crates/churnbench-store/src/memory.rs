//! In-process reference store.
//!
//! Rows live in a `BTreeMap<i64, Vec<f32>>` per entity behind one `RwLock`.
//! Each index keeps the set of ids it covered at its last build: index queries
//! only see those ids (minus deleted rows), so recall against an exact scan
//! drops as inserts accumulate and recovers once a rebuild lands.
//!
//! ```text
//!   create_index / rebuild(Async)          spawned build task
//!   ───────────────────────────► STALE ───────────────────────► CLEAN
//!          generation += 1               (only if generation unchanged)
//! ```
//!
//! Writes inside a transaction are staged and applied on commit. Writes without
//! a transaction commit immediately.

use crate::{
    BatchInsert, ColumnDef, ColumnType, CreateIndex, Delete, Direction, IndexHandle, IndexHint,
    IndexParams, IndexState, IndexType, PlanStep, Predicate, Query, RebuildMode, ResultRow, Row,
    StatusClass, StatusRow, StoreError, StoreResult, TxId, TxMode, VectorStore,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rows below this count are scanned on the calling thread even when the query
/// asks for parallelism.
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

// ============================================================================
// State
// ============================================================================

#[derive(Debug)]
struct Entity {
    columns: Vec<ColumnDef>,
    id_column: String,
    vector_column: String,
    dimension: usize,
    rows: BTreeMap<i64, Vec<f32>>,
    indexes: BTreeMap<String, Index>,
}

impl Entity {
    fn check_columns(&self, columns: &[String; 2]) -> StoreResult<()> {
        if columns[0] != self.id_column || columns[1] != self.vector_column {
            return Err(StoreError::InvalidArgument(format!(
                "columns ({}, {}) do not match ({}, {})",
                columns[0], columns[1], self.id_column, self.vector_column
            )));
        }
        Ok(())
    }

    fn check_rows(&self, rows: &[Row]) -> StoreResult<()> {
        match rows.iter().find(|(_, v)| v.len() != self.dimension) {
            Some((id, v)) => Err(StoreError::InvalidArgument(format!(
                "row {id} has {} components, column {} expects {}",
                v.len(),
                self.vector_column,
                self.dimension
            ))),
            None => Ok(()),
        }
    }

    fn check_insert(&self, insert: &BatchInsert) -> StoreResult<()> {
        self.check_columns(&insert.columns)?;
        self.check_rows(&insert.rows)
    }

    fn insert_rows(&mut self, rows: &[Row]) -> u64 {
        for (id, vector) in rows {
            self.rows.insert(*id, vector.clone());
        }
        rows.len() as u64
    }

    fn delete_matching(&mut self, predicate: &Predicate) -> u64 {
        let doomed: Vec<i64> = match predicate {
            Predicate::IdIn(ids) => ids
                .iter()
                .copied()
                .collect::<HashSet<_>>()
                .into_iter()
                .filter(|id| self.rows.contains_key(id))
                .collect(),
            _ => self.rows.keys().copied().filter(|id| predicate.matches(*id)).collect(),
        };
        for id in &doomed {
            self.rows.remove(id);
        }
        doomed.len() as u64
    }

    fn count_matching(&self, predicate: &Predicate) -> u64 {
        match predicate {
            Predicate::IdIn(ids) => ids
                .iter()
                .collect::<HashSet<_>>()
                .into_iter()
                .filter(|id| self.rows.contains_key(id))
                .count() as u64,
            _ => self.rows.keys().filter(|id| predicate.matches(**id)).count() as u64,
        }
    }

    fn index_for(&self, hint: IndexHint) -> StoreResult<Option<&Index>> {
        match hint {
            IndexHint::Disallow => Ok(None),
            IndexHint::Auto => Ok(self.indexes.values().find(|i| i.index_type.is_nns())),
            IndexHint::Use(t) if !t.is_nns() => Err(StoreError::Unsupported(format!(
                "{t} indexes cannot serve nearest-neighbor queries"
            ))),
            IndexHint::Use(t) => self
                .indexes
                .values()
                .find(|i| i.index_type == t)
                .map(Some)
                .ok_or_else(|| StoreError::NotFound {
                    kind: "index",
                    name: format!("{t} on {}", self.vector_column),
                }),
        }
    }
}

#[derive(Debug)]
struct Index {
    name: String,
    index_type: IndexType,
    params: IndexParams,
    state: IndexState,
    generation: u64,
    covered: HashSet<i64>,
}

#[derive(Debug)]
enum Staged {
    Insert(BatchInsert),
    Delete(Delete),
}

impl Staged {
    fn entity(&self) -> &str {
        match self {
            Staged::Insert(insert) => &insert.entity,
            Staged::Delete(delete) => &delete.entity,
        }
    }
}

#[derive(Debug)]
struct Transaction {
    mode: TxMode,
    staged: Vec<Staged>,
}

/// Counters describing the calls a [`MemoryStore`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub inserts_attempted: u64,
    pub deletes_attempted: u64,
    pub rejected: u64,
    pub rebuilds_requested: u64,
    pub queries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    inserts_attempted: AtomicU64,
    deletes_attempted: AtomicU64,
    rejected: AtomicU64,
    rebuilds_requested: AtomicU64,
    queries: AtomicU64,
}

#[derive(Debug, Default)]
struct Shared {
    entities: RwLock<HashMap<String, Entity>>,
    transactions: Mutex<HashMap<TxId, Transaction>>,
    next_tx: AtomicU64,
    exhausted_calls: AtomicU64,
    counters: Counters,
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-process [`VectorStore`].
///
/// Cloning is cheap; clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    latency: Duration,
    build_delay: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed delay to every mutation and query.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// How long an index (re)build takes before the index reports `CLEAN`.
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    /// Makes the next `calls` inserts or deletes fail with
    /// [`StoreError::ResourceExhausted`].
    pub fn inject_resource_exhaustion(&self, calls: u64) {
        self.shared.exhausted_calls.store(calls, Ordering::SeqCst);
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.shared.counters;
        StoreStats {
            inserts_attempted: c.inserts_attempted.load(Ordering::Relaxed),
            deletes_attempted: c.deletes_attempted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            rebuilds_requested: c.rebuilds_requested.load(Ordering::Relaxed),
            queries: c.queries.load(Ordering::Relaxed),
        }
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn take_injected_fault(&self, op: &str) -> StoreResult<()> {
        let took = self
            .shared
            .exhausted_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::ResourceExhausted(format!("{op}: too many concurrent requests")));
        }
        Ok(())
    }

    fn writable_tx(&self, tx: TxId) -> StoreResult<()> {
        let txs = self.shared.transactions.lock();
        match txs.get(&tx) {
            None => Err(unknown_tx(tx)),
            Some(t) if t.mode == TxMode::ReadOnly => Err(StoreError::Transaction {
                tx,
                reason: "write attempted in a read-only transaction".into(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn stage(&self, tx: TxId, op: Staged) -> StoreResult<()> {
        let mut txs = self.shared.transactions.lock();
        let t = txs.get_mut(&tx).ok_or_else(|| unknown_tx(tx))?;
        t.staged.push(op);
        Ok(())
    }

    fn apply_insert(&self, insert: &BatchInsert) -> StoreResult<u64> {
        let mut entities = self.shared.entities.write();
        let entity = writable_entity(&mut entities, &insert.entity)?;
        entity.check_insert(insert)?;
        Ok(entity.insert_rows(&insert.rows))
    }

    fn apply_delete(&self, delete: &Delete) -> StoreResult<u64> {
        let mut entities = self.shared.entities.write();
        Ok(writable_entity(&mut entities, &delete.entity)?.delete_matching(&delete.predicate))
    }

    /// Marks the index stale and returns the generation the next build must match.
    fn begin_build(&self, handle: &IndexHandle) -> StoreResult<u64> {
        let mut entities = self.shared.entities.write();
        let index = entities
            .get_mut(&handle.entity)
            .ok_or_else(|| StoreError::entity_not_found(&handle.entity))?
            .indexes
            .get_mut(&handle.name)
            .ok_or_else(|| index_not_found(handle))?;
        index.generation += 1;
        index.state = IndexState::Stale;
        Ok(index.generation)
    }

    fn spawn_build(&self, handle: IndexHandle, generation: u64) {
        let shared = self.shared.clone();
        let delay = self.build_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            finish_build(&shared, &handle, generation);
        });
    }

    fn plan(&self, query: &Query) -> StoreResult<Vec<PlanStep>> {
        let entities = self.shared.entities.read();
        let entity = entities
            .get(&query.entity)
            .ok_or_else(|| StoreError::entity_not_found(&query.entity))?;
        let mut steps = Vec::new();
        match entity.index_for(query.index)? {
            Some(index) => steps.push(PlanStep::new(
                format!("IndexScan({})", index.index_type),
                format!(
                    "{}.{} [{}] {}",
                    query.entity,
                    index.name,
                    index.state.as_str(),
                    index
                        .params
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join(",")
                ),
            )),
            None => steps.push(PlanStep::new(
                "EntityScan",
                format!("{} ({} rows)", query.entity, entity.rows.len()),
            )),
        }
        if let Some(predicate) = &query.predicate {
            steps.push(PlanStep::new("Filter", format!("{predicate:?}")));
        }
        if let Some(d) = &query.distance {
            steps.push(PlanStep::new(
                "Distance",
                format!("{}({}) AS {}", d.function.as_str(), d.column, d.alias),
            ));
        }
        if let Some((column, direction)) = &query.order {
            steps.push(PlanStep::new("Sort", format!("{column} {direction:?}")));
        }
        if let Some(limit) = query.limit {
            steps.push(PlanStep::new("Limit", limit.to_string()));
        }
        if query.parallelism > 1 {
            steps.push(PlanStep::new("Parallel", query.parallelism.to_string()));
        }
        Ok(steps)
    }

    fn execute(&self, query: &Query) -> StoreResult<Vec<ResultRow>> {
        let entities = self.shared.entities.read();
        let entity = entities
            .get(&query.entity)
            .ok_or_else(|| StoreError::entity_not_found(&query.entity))?;
        let index = entity.index_for(query.index)?;

        let candidates: Vec<(&i64, &Vec<f32>)> = entity
            .rows
            .iter()
            .filter(|(id, _)| index.map_or(true, |i| i.covered.contains(*id)))
            .filter(|(id, _)| query.predicate.as_ref().map_or(true, |p| p.matches(**id)))
            .collect();

        let mut results: Vec<ResultRow> = match &query.distance {
            Some(spec) => {
                if spec.vector.len() != entity.dimension {
                    return Err(StoreError::InvalidArgument(format!(
                        "query vector has {} components, column {} expects {}",
                        spec.vector.len(),
                        spec.column,
                        entity.dimension
                    )));
                }
                let score = |(id, v): &(&i64, &Vec<f32>)| ResultRow {
                    id: **id,
                    distance: spec.function.eval(&spec.vector, v),
                };
                if query.parallelism > 1 && candidates.len() >= PARALLEL_SCAN_THRESHOLD {
                    candidates.par_iter().map(score).collect()
                } else {
                    candidates.iter().map(score).collect()
                }
            }
            None => candidates
                .iter()
                .map(|(id, _)| ResultRow {
                    id: **id,
                    distance: 0.0,
                })
                .collect(),
        };

        if let Some((column, direction)) = &query.order {
            let by_distance = query
                .distance
                .as_ref()
                .map_or(false, |d| &d.alias == column);
            if by_distance {
                results.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
            } else {
                results.sort_by_key(|r| r.id);
            }
            if *direction == Direction::Desc {
                results.reverse();
            }
        }
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn check_read_tx(&self, tx: Option<TxId>) -> StoreResult<()> {
        match tx {
            Some(tx) if !self.shared.transactions.lock().contains_key(&tx) => Err(unknown_tx(tx)),
            _ => Ok(()),
        }
    }
}

fn writable_entity<'a>(entities: &'a mut HashMap<String, Entity>, name: &str) -> StoreResult<&'a mut Entity> {
    entities.get_mut(name).ok_or_else(|| StoreError::entity_not_found(name))
}

fn unknown_tx(tx: TxId) -> StoreError {
    StoreError::Transaction {
        tx,
        reason: "unknown or already finished transaction".into(),
    }
}

fn index_not_found(handle: &IndexHandle) -> StoreError {
    StoreError::NotFound {
        kind: "index",
        name: handle.to_string(),
    }
}

fn finish_build(shared: &Shared, handle: &IndexHandle, generation: u64) {
    let mut entities = shared.entities.write();
    let Some(entity) = entities.get_mut(&handle.entity) else {
        tracing::debug!(index = %handle, "entity dropped before index build finished");
        return;
    };
    let covered: HashSet<i64> = entity.rows.keys().copied().collect();
    let Some(index) = entity.indexes.get_mut(&handle.name) else {
        return;
    };
    if index.generation != generation {
        tracing::trace!(index = %handle, generation, "superseded index build discarded");
        return;
    }
    index.covered = covered;
    index.state = IndexState::Clean;
    tracing::debug!(
        index = %handle,
        index_type = %index.index_type,
        rows = index.covered.len(),
        "index build finished"
    );
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn begin_transaction(&self, mode: TxMode) -> StoreResult<TxId> {
        let tx = self.shared.next_tx.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.transactions.lock().insert(
            tx,
            Transaction {
                mode,
                staged: Vec::new(),
            },
        );
        Ok(tx)
    }

    /// Applies every staged write under one lock, or none of them. The
    /// transaction is closed either way.
    async fn commit(&self, tx: TxId) -> StoreResult<()> {
        let t = self
            .shared
            .transactions
            .lock()
            .remove(&tx)
            .ok_or_else(|| unknown_tx(tx))?;

        let mut entities = self.shared.entities.write();
        for op in &t.staged {
            let entity = entities
                .get(op.entity())
                .ok_or_else(|| StoreError::Transaction {
                    tx,
                    reason: format!("commit aborted: entity {} no longer exists", op.entity()),
                })?;
            if let Staged::Insert(insert) = op {
                entity.check_insert(insert)?;
            }
        }
        for op in &t.staged {
            let entity = writable_entity(&mut entities, op.entity())?;
            match op {
                Staged::Insert(insert) => entity.insert_rows(&insert.rows),
                Staged::Delete(delete) => entity.delete_matching(&delete.predicate),
            };
        }
        tracing::trace!(tx, staged = t.staged.len(), "transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: TxId) -> StoreResult<()> {
        self.shared
            .transactions
            .lock()
            .remove(&tx)
            .map(|_| ())
            .ok_or_else(|| unknown_tx(tx))
    }

    async fn create_entity(&self, entity: &str, columns: &[ColumnDef]) -> StoreResult<()> {
        let id_column = columns
            .iter()
            .find(|c| c.ty == ColumnType::Long)
            .ok_or_else(|| StoreError::InvalidArgument(format!("{entity}: no LONG id column")))?;
        let (vector_column, dimension) = columns
            .iter()
            .find_map(|c| match c.ty {
                ColumnType::FloatVector(d) => Some((c, d)),
                ColumnType::Long => None,
            })
            .ok_or_else(|| StoreError::InvalidArgument(format!("{entity}: no FLOAT_VECTOR column")))?;

        let mut entities = self.shared.entities.write();
        if entities.contains_key(entity) {
            return Err(StoreError::AlreadyExists {
                kind: "entity",
                name: entity.to_string(),
            });
        }
        entities.insert(
            entity.to_string(),
            Entity {
                columns: columns.to_vec(),
                id_column: id_column.name.clone(),
                vector_column: vector_column.name.clone(),
                dimension,
                rows: BTreeMap::new(),
                indexes: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_entity(&self, entity: &str) -> StoreResult<()> {
        self.shared
            .entities
            .write()
            .remove(entity)
            .map(|_| ())
            .ok_or_else(|| StoreError::entity_not_found(entity))
    }

    async fn create_index(&self, request: &CreateIndex) -> StoreResult<IndexHandle> {
        if request.index_type == IndexType::Scan {
            return Err(StoreError::InvalidArgument("SCAN is not a buildable index type".into()));
        }
        let handle = IndexHandle {
            entity: request.entity.clone(),
            name: request.name.clone(),
        };
        {
            let mut entities = self.shared.entities.write();
            let entity = entities
                .get_mut(&request.entity)
                .ok_or_else(|| StoreError::entity_not_found(&request.entity))?;
            if entity.vector_column != request.column && entity.id_column != request.column {
                return Err(StoreError::NotFound {
                    kind: "column",
                    name: format!("{}.{}", request.entity, request.column),
                });
            }
            if entity.indexes.contains_key(&request.name) {
                return Err(StoreError::AlreadyExists {
                    kind: "index",
                    name: handle.to_string(),
                });
            }
            entity.indexes.insert(
                request.name.clone(),
                Index {
                    name: request.name.clone(),
                    index_type: request.index_type,
                    params: request.params.clone(),
                    state: IndexState::Stale,
                    generation: 1,
                    covered: HashSet::new(),
                },
            );
        }
        tracing::debug!(index = %handle, index_type = %request.index_type, "index build scheduled");
        self.spawn_build(handle.clone(), 1);
        Ok(handle)
    }

    async fn rebuild_index(&self, index: &IndexHandle, mode: RebuildMode) -> StoreResult<()> {
        self.shared
            .counters
            .rebuilds_requested
            .fetch_add(1, Ordering::Relaxed);
        let generation = self.begin_build(index)?;
        match mode {
            RebuildMode::Async => self.spawn_build(index.clone(), generation),
            RebuildMode::Sync => {
                if !self.build_delay.is_zero() {
                    tokio::time::sleep(self.build_delay).await;
                }
                finish_build(&self.shared, index, generation);
            }
        }
        Ok(())
    }

    async fn batch_insert(&self, insert: &BatchInsert) -> StoreResult<u64> {
        self.shared
            .counters
            .inserts_attempted
            .fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.take_injected_fault("insert")?;
        match insert.tx {
            None => self.apply_insert(insert),
            Some(tx) => {
                self.writable_tx(tx)?;
                self.shared
                    .entities
                    .read()
                    .get(&insert.entity)
                    .ok_or_else(|| StoreError::entity_not_found(&insert.entity))?
                    .check_insert(insert)?;
                self.stage(tx, Staged::Insert(insert.clone()))?;
                Ok(insert.rows.len() as u64)
            }
        }
    }

    async fn delete(&self, delete: &Delete) -> StoreResult<u64> {
        self.shared
            .counters
            .deletes_attempted
            .fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.take_injected_fault("delete")?;
        match delete.tx {
            None => self.apply_delete(delete),
            Some(tx) => {
                self.writable_tx(tx)?;
                let matching = {
                    let entities = self.shared.entities.read();
                    entities
                        .get(&delete.entity)
                        .ok_or_else(|| StoreError::entity_not_found(&delete.entity))?
                        .count_matching(&delete.predicate)
                };
                self.stage(tx, Staged::Delete(delete.clone()))?;
                Ok(matching)
            }
        }
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<ResultRow>> {
        self.shared.counters.queries.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.check_read_tx(query.tx)?;
        self.execute(query)
    }

    async fn explain(&self, query: &Query) -> StoreResult<Vec<PlanStep>> {
        self.check_read_tx(query.tx)?;
        self.plan(query)
    }

    async fn about_entity(&self, entity: &str) -> StoreResult<Vec<StatusRow>> {
        let entities = self.shared.entities.read();
        let e = entities
            .get(entity)
            .ok_or_else(|| StoreError::entity_not_found(entity))?;
        let mut rows = vec![StatusRow {
            class: StatusClass::Entity,
            name: entity.to_string(),
            info: format!("{} rows", e.rows.len()),
        }];
        rows.extend(e.columns.iter().map(|c| StatusRow {
            class: StatusClass::Column,
            name: format!("{entity}.{}", c.name),
            info: match c.ty {
                ColumnType::Long => "LONG".to_string(),
                ColumnType::FloatVector(d) => format!("FLOAT_VECTOR({d})"),
            },
        }));
        rows.extend(e.indexes.values().map(|i| StatusRow {
            class: StatusClass::Index,
            name: format!("{entity}.{}", i.name),
            info: i.state.as_str().to_string(),
        }));
        Ok(rows)
    }

    async fn count(&self, entity: &str) -> StoreResult<u64> {
        self.shared
            .entities
            .read()
            .get(entity)
            .map(|e| e.rows.len() as u64)
            .ok_or_else(|| StoreError::entity_not_found(entity))
    }
}
