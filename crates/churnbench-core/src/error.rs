//! Engine errors.
//!
//! Only preparation and export failures abort a run. Errors raised inside a
//! generator batch or a sampler iteration are logged by the owning task and never
//! surface here.

use churnbench_dataset::DatasetError;
use churnbench_store::StoreError;
use std::path::PathBuf;

pub type BenchResult<T> = Result<T, BenchError>;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("preparation failed: {0}")]
    Prepare(String),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to export {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("benchmark task failed: {0}")]
    Task(String),
}

impl BenchError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<tokio::task::JoinError> for BenchError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
