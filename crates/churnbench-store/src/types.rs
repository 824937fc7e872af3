//! Schema, index, and mutation request types shared by every backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Transaction identifier handed out by [`crate::VectorStore::begin_transaction`].
pub type TxId = u64;

/// A single `(id, vector)` row.
pub type Row = (i64, Vec<f32>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadWrite,
    ReadOnly,
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Long,
    FloatVector(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn long(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ColumnType::Long,
            nullable: false,
        }
    }

    pub fn float_vector(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            ty: ColumnType::FloatVector(dimension),
            nullable: false,
        }
    }
}

// ============================================================================
// Indexes
// ============================================================================

/// Index structures a benchmark can target.
///
/// `Scan` names the index-free baseline; `BTree` exists for completeness but
/// cannot answer nearest-neighbor queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexType {
    Vaf,
    Pq,
    IvfPq,
    BTree,
    Scan,
}

impl IndexType {
    pub const ALL: [IndexType; 5] = [
        IndexType::Vaf,
        IndexType::Pq,
        IndexType::IvfPq,
        IndexType::BTree,
        IndexType::Scan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Vaf => "VAF",
            IndexType::Pq => "PQ",
            IndexType::IvfPq => "IVFPQ",
            IndexType::BTree => "BTREE",
            IndexType::Scan => "SCAN",
        }
    }

    /// Whether this index type can serve nearest-neighbor search.
    pub fn is_nns(&self) -> bool {
        matches!(self, IndexType::Vaf | IndexType::Pq | IndexType::IvfPq)
    }

    /// Build parameters used when a benchmark does not supply its own.
    pub fn default_params(&self) -> IndexParams {
        let pairs: &[(&str, &str)] = match self {
            IndexType::Vaf => &[("vaf.marks_per_dimension", "35")],
            IndexType::Pq => &[("pq.centroids", "4096"), ("pq.subspaces", "8")],
            IndexType::IvfPq => &[
                ("ivfpq.centroids", "4096"),
                ("ivfpq.subspaces", "8"),
                ("ivfpq.coarse_centroids", "256"),
            ],
            IndexType::BTree | IndexType::Scan => &[],
        };
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        IndexType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("unknown index type `{s}` (expected VAF, PQ, IVFPQ, BTREE or SCAN)"))
    }
}

pub type IndexParams = BTreeMap<String, String>;

/// Request for [`crate::VectorStore::create_index`].
#[derive(Debug, Clone)]
pub struct CreateIndex {
    pub entity: String,
    pub column: String,
    pub index_type: IndexType,
    pub name: String,
    pub params: IndexParams,
}

impl CreateIndex {
    pub fn new(entity: impl Into<String>, column: impl Into<String>, index_type: IndexType) -> Self {
        Self {
            entity: entity.into(),
            column: column.into(),
            index_type,
            name: format!("idx_{}", index_type.as_str().to_ascii_lowercase()),
            params: index_type.default_params(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Fully qualified reference to an index: `<entity>.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexHandle {
    pub entity: String,
    pub name: String,
}

impl fmt::Display for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildMode {
    /// Return once the rebuild has finished.
    Sync,
    /// Return immediately; the index reports `STALE` until the rebuild lands.
    Async,
}

// ============================================================================
// Mutations
// ============================================================================

/// Row filter for deletes and filtered queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    IdIn(Vec<i64>),
    IdBetween { low: i64, high: i64 },
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn matches(&self, id: i64) -> bool {
        match self {
            Predicate::IdIn(ids) => ids.contains(&id),
            Predicate::IdBetween { low, high } => (*low..=*high).contains(&id),
            Predicate::Not(inner) => !inner.matches(id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchInsert {
    pub entity: String,
    pub columns: [String; 2],
    pub rows: Vec<Row>,
    pub tx: Option<TxId>,
}

impl BatchInsert {
    pub fn new(entity: impl Into<String>, id_column: impl Into<String>, vector_column: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            columns: [id_column.into(), vector_column.into()],
            rows: Vec::new(),
            tx: None,
        }
    }

    pub fn rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    pub fn append(&mut self, id: i64, vector: Vec<f32>) {
        self.rows.push((id, vector));
    }

    pub fn tx(mut self, tx: TxId) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Largest id in the batch.
    pub fn max_id(&self) -> Option<i64> {
        self.rows.iter().map(|(id, _)| *id).max()
    }
}

#[derive(Debug, Clone)]
pub struct Delete {
    pub entity: String,
    pub predicate: Predicate,
    pub tx: Option<TxId>,
}

impl Delete {
    pub fn new(entity: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            entity: entity.into(),
            predicate,
            tx: None,
        }
    }

    pub fn tx(mut self, tx: TxId) -> Self {
        self.tx = Some(tx);
        self
    }
}

// ============================================================================
// Status / results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Entity,
    Column,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Clean,
    Stale,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Clean => "CLEAN",
            IndexState::Stale => "STALE",
        }
    }
}

impl FromStr for IndexState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLEAN" => Ok(IndexState::Clean),
            "STALE" => Ok(IndexState::Stale),
            other => Err(format!("unknown index state `{other}`")),
        }
    }
}

/// One row of [`crate::VectorStore::about_entity`] output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub class: StatusClass,
    pub name: String,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub designation: String,
    pub detail: String,
}

impl PlanStep {
    pub fn new(designation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            designation: designation.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultRow {
    pub id: i64,
    pub distance: f32,
}
