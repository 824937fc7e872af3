//! Shared data feeds: the locked insert source and the inserted-vector queue.

use churnbench_dataset::{DatasetResult, DatasetSource, Record};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Capacity of [`QueryQueue`].
pub const QUERY_QUEUE_CAPACITY: usize = 500;

/// The dataset source insert generators draw from, behind one lock.
///
/// Preparation consumes the corpus prefix; generators continue from there.
#[derive(Clone)]
pub struct SharedSource {
    inner: Arc<Mutex<Box<dyn DatasetSource>>>,
}

impl std::fmt::Debug for SharedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSource").finish_non_exhaustive()
    }
}

impl SharedSource {
    pub fn new(source: Box<dyn DatasetSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    /// Reads up to `count` records while holding the lock.
    pub fn take(&self, count: usize) -> DatasetResult<Vec<Record>> {
        self.inner.lock().next_batch(count)
    }

    pub fn has_next(&self) -> bool {
        self.inner.lock().has_next()
    }
}

/// Bounded FIFO of freshly inserted vectors. Offers beyond capacity are dropped.
#[derive(Debug)]
pub struct QueryQueue {
    queue: Mutex<VecDeque<Vec<f32>>>,
    capacity: usize,
}

impl Default for QueryQueue {
    fn default() -> Self {
        Self::with_capacity(QUERY_QUEUE_CAPACITY)
    }
}

impl QueryQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Returns `false` when the queue was full.
    pub fn offer(&self, vector: Vec<f32>) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(vector);
        true
    }

    pub fn poll(&self) -> Option<Vec<f32>> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use churnbench_dataset::InMemoryDataset;

    #[test]
    fn queue_is_bounded_fifo() {
        let q = QueryQueue::with_capacity(2);
        assert!(q.offer(vec![1.0]));
        assert!(q.offer(vec![2.0]));
        assert!(!q.offer(vec![3.0]));
        assert_eq!(q.poll(), Some(vec![1.0]));
        assert_eq!(q.poll(), Some(vec![2.0]));
        assert!(q.poll().is_none());
        assert_eq!(QueryQueue::default().capacity, QUERY_QUEUE_CAPACITY);
    }

    #[test]
    fn shared_source_hands_out_disjoint_batches() {
        let ds = InMemoryDataset::new(1, (0..10).map(|i| vec![i as f32]).collect()).unwrap();
        let source = SharedSource::new(Box::new(ds));
        let other = source.clone();
        let a = source.take(4).unwrap();
        let b = other.take(4).unwrap();
        assert_eq!(a.last().map(|r| r.0), Some(4));
        assert_eq!(b.first().map(|r| r.0), Some(5));
        assert_eq!(source.take(4).unwrap().len(), 2);
        assert!(!other.has_next());
    }
}
