//! In-memory datasets backed by a shared, immutable vector list.
//!
//! Every open source gets its own cursor into the same `Arc`'d snapshot, so
//! reopening is free and independent readers never contend.

use crate::{DatasetError, DatasetOpener, DatasetResult, DatasetSource, Record};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    vectors: Arc<Vec<Vec<f32>>>,
    dimension: usize,
    position: usize,
}

impl InMemoryDataset {
    /// Wraps `vectors`. All vectors must have `dimension` components.
    pub fn new(dimension: usize, vectors: Vec<Vec<f32>>) -> DatasetResult<Self> {
        Self::shared(dimension, Arc::new(vectors))
    }

    pub fn shared(dimension: usize, vectors: Arc<Vec<Vec<f32>>>) -> DatasetResult<Self> {
        if let Some((index, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dimension) {
            return Err(DatasetError::VectorLength {
                index,
                expected: dimension,
                found: v.len(),
            });
        }
        Ok(Self {
            vectors,
            dimension,
            position: 0,
        })
    }

    pub fn opener(&self) -> InMemoryOpener {
        InMemoryOpener {
            vectors: self.vectors.clone(),
            dimension: self.dimension,
        }
    }
}

impl DatasetSource for InMemoryDataset {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn size(&self) -> u64 {
        self.vectors.len() as u64
    }

    fn has_next(&self) -> bool {
        self.position < self.vectors.len()
    }

    fn remaining(&self) -> u64 {
        self.vectors.len().saturating_sub(self.position) as u64
    }

    fn next_record(&mut self) -> DatasetResult<Record> {
        let v = self
            .vectors
            .get(self.position)
            .ok_or(DatasetError::Exhausted)?
            .clone();
        self.position += 1;
        Ok((self.position as i64, v))
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryOpener {
    vectors: Arc<Vec<Vec<f32>>>,
    dimension: usize,
}

impl DatasetOpener for InMemoryOpener {
    fn open(&self) -> DatasetResult<Box<dyn DatasetSource>> {
        Ok(Box::new(InMemoryDataset {
            vectors: self.vectors.clone(),
            dimension: self.dimension,
            position: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_all_vectors_then_exhausts() {
        let mut ds = InMemoryDataset::new(2, vec![vec![0.0, 1.0], vec![2.0, 3.0]]).unwrap();
        assert_eq!(ds.next_record().unwrap(), (1, vec![0.0, 1.0]));
        assert_eq!(ds.next_record().unwrap(), (2, vec![2.0, 3.0]));
        assert!(!ds.has_next());
        assert!(matches!(ds.next_record(), Err(DatasetError::Exhausted)));
    }

    #[test]
    fn next_batch_stops_at_end() {
        let mut ds = InMemoryDataset::new(1, vec![vec![0.0]; 3]).unwrap();
        assert_eq!(ds.next_batch(2).unwrap().len(), 2);
        assert_eq!(ds.next_batch(5).unwrap().len(), 1);
        assert!(ds.next_batch(5).unwrap().is_empty());
    }

    #[test]
    fn oversized_batch_returns_what_is_left() {
        let mut ds = InMemoryDataset::new(2, vec![vec![1.0, 2.0]; 3]).unwrap();
        assert_eq!(ds.remaining(), 3);
        assert_eq!(ds.next_batch(1 << 60).unwrap().len(), 3);
        assert_eq!(ds.remaining(), 0);

        let mut boxed: Box<dyn DatasetSource> = ds.opener().open().unwrap();
        boxed.next_record().unwrap();
        assert_eq!(boxed.next_batch(1 << 44).unwrap().len(), 2);
    }

    #[test]
    fn rejects_ragged_input() {
        let err = InMemoryDataset::new(2, vec![vec![0.0, 1.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, DatasetError::VectorLength { index: 1, .. }));
    }

    #[test]
    fn openers_have_independent_cursors() {
        let ds = InMemoryDataset::new(1, vec![vec![1.0], vec![2.0]]).unwrap();
        let opener = ds.opener();
        let mut a = opener.open().unwrap();
        let mut b = opener.open().unwrap();
        a.next_record().unwrap();
        assert_eq!(b.next_record().unwrap().0, 1);
        assert_eq!(a.next_record().unwrap().0, 2);
    }
}
