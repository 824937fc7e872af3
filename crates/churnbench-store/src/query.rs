//! Query descriptor.
//!
//! A [`Query`] names the entity, the projected columns, one distance function
//! over a vector column, the ordering and limit, and how the planner may use
//! indexes:
//!
//! ```text
//! SELECT id, distance(feature, q, L2) AS distance
//!   FROM bench.t [WHERE <predicate>]
//!  ORDER BY distance ASC LIMIT k        -- USE INDEX(PQ) | DISALLOW INDEX
//! ```

use crate::{IndexType, Predicate, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    L2,
    Cosine,
    InnerProduct,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::L2 => "euclidean",
            Distance::Cosine => "cosine",
            Distance::InnerProduct => "inner_product",
        }
    }

    /// Distance between `a` and `b`; smaller is closer for every variant.
    pub fn eval(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Distance::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
            Distance::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Planner override for index usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexHint {
    #[default]
    Auto,
    Use(IndexType),
    Disallow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceSpec {
    pub column: String,
    pub vector: Vec<f32>,
    pub function: Distance,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub entity: String,
    pub columns: Vec<String>,
    pub distance: Option<DistanceSpec>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<usize>,
    pub parallelism: usize,
    pub index: IndexHint,
    pub predicate: Option<Predicate>,
    pub tx: Option<TxId>,
}

impl Query {
    pub fn from(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            columns: Vec::new(),
            distance: None,
            order: None,
            limit: None,
            parallelism: 1,
            index: IndexHint::Auto,
            predicate: None,
            tx: None,
        }
    }

    pub fn select(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn distance(
        mut self,
        column: impl Into<String>,
        vector: Vec<f32>,
        function: Distance,
        alias: impl Into<String>,
    ) -> Self {
        self.distance = Some(DistanceSpec {
            column: column.into(),
            vector,
            function,
            alias: alias.into(),
        });
        self
    }

    pub fn order(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn use_index_type(mut self, index_type: IndexType) -> Self {
        self.index = IndexHint::Use(index_type);
        self
    }

    pub fn disallow_index(mut self) -> Self {
        self.index = IndexHint::Disallow;
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn tx(mut self, tx: TxId) -> Self {
        self.tx = Some(tx);
        self
    }

    /// The nearest-neighbor query shape the benchmark issues: `id` plus an L2
    /// distance alias, ascending, limited to `k`.
    pub fn nns(entity: impl Into<String>, column: impl Into<String>, vector: Vec<f32>, k: usize) -> Self {
        Query::from(entity)
            .select("id")
            .distance(column, vector, Distance::L2, "distance")
            .order("distance", Direction::Asc)
            .limit(k)
    }
}
