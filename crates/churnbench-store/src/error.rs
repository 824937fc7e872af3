//! Store error taxonomy.
//!
//! The benchmark engine only needs to tell three things apart: "not found"
//! (tolerated when dropping), "resource exhausted" (retried), and everything else.

use crate::TxId;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transaction {tx}: {reason}")]
    Transaction { tx: TxId, reason: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn entity_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "entity",
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Contention errors that callers may retry with the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}
