//! Churnbench dataset sources
//!
//! A dataset is a finite, sequential stream of `(id, vector)` records. Sources are
//! consumed front to back and restarted by reopening them through a
//! [`DatasetOpener`]:
//!
//! ```text
//! ┌──────────────┐  open()  ┌─────────────────┐  next_record()  ┌───────────────┐
//! │ DatasetOpener│─────────►│  DatasetSource  │────────────────►│ (id, Vec<f32>)│
//! └──────────────┘          └─────────────────┘                 └───────────────┘
//! ```
//!
//! - [`fbin`]: little-endian `.fbin` files (`count`, `dim`, `count × dim` floats).
//! - [`memory`]: shared in-memory vectors, cheap to reopen.
//! - [`synthetic`]: seeded clustered vectors for runs without external data.

pub mod fbin;
pub mod memory;
pub mod synthetic;

use std::path::PathBuf;

pub use fbin::{write_fbin, FbinOpener, FbinReader};
pub use memory::{InMemoryDataset, InMemoryOpener};

/// One dataset entry: a 1-based id and its feature vector.
pub type Record = (i64, Vec<f32>);

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to open dataset {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read the {0} field from the dataset header")]
    Header(&'static str),
    #[error("dimension mismatch; expected {expected} but found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("dataset declares {declared} records but only {available} are present")]
    ShortFile { declared: u64, available: u64 },
    #[error("premature end of file while reading record {record}")]
    Truncated { record: u64 },
    #[error("vector {index} has {found} components, expected {expected}")]
    VectorLength {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("dataset exhausted")]
    Exhausted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A sequential reader yielding `(id, vector)` pairs.
///
/// Sources are not safe for concurrent reads; callers sharing one must guard it
/// with a lock.
pub trait DatasetSource: Send {
    /// Dimensionality of every vector in this source.
    fn dimension(&self) -> usize;

    /// Total number of records in the underlying dataset.
    fn size(&self) -> u64;

    /// Whether another call to [`DatasetSource::next_record`] will succeed.
    fn has_next(&self) -> bool;

    /// Records left before the source is exhausted.
    fn remaining(&self) -> u64;

    /// Reads the next record. Returns [`DatasetError::Exhausted`] past the end.
    fn next_record(&mut self) -> DatasetResult<Record>;

    /// Reads up to `count` records, stopping early at the end of the source.
    fn next_batch(&mut self, count: usize) -> DatasetResult<Vec<Record>> {
        let cap = usize::try_from(self.remaining()).map_or(count, |left| count.min(left));
        let mut out = Vec::with_capacity(cap);
        while out.len() < count && self.has_next() {
            out.push(self.next_record()?);
        }
        Ok(out)
    }
}

/// Reopens a dataset from the beginning.
pub trait DatasetOpener: Send + Sync {
    fn open(&self) -> DatasetResult<Box<dyn DatasetSource>>;
}

impl<S: DatasetSource + ?Sized> DatasetSource for Box<S> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn has_next(&self) -> bool {
        (**self).has_next()
    }

    fn remaining(&self) -> u64 {
        (**self).remaining()
    }

    fn next_record(&mut self) -> DatasetResult<Record> {
        (**self).next_record()
    }
}
