//! Column-oriented measurement series.
//!
//! The sampler appends one [`MeasurementRow`] per successful iteration. Rows are
//! stored as parallel columns, the shape `measurements.json` is written in:
//!
//! ```text
//! { "timestamp": [0, 0, 1, ...], "insertsExecuted": [...], ..., "resultCount": [...] }
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRow {
    /// Whole seconds since the sampler started.
    pub timestamp: i64,
    pub inserts_executed: u64,
    pub deletes_executed: u64,
    pub out_of_bounds: u64,
    pub k: usize,
    pub rebuilt: bool,
    pub runtime_ms: f64,
    pub recall: f64,
    pub ndcg: f64,
    pub result_count: usize,
}

/// Append-only columns, one entry per [`MeasurementRow`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementSeries {
    pub timestamp: Vec<i64>,
    pub inserts_executed: Vec<u64>,
    pub deletes_executed: Vec<u64>,
    pub out_of_bounds: Vec<u64>,
    pub k: Vec<usize>,
    pub rebuilt: Vec<bool>,
    pub runtime_ms: Vec<f64>,
    pub recall: Vec<f64>,
    pub ndcg: Vec<f64>,
    pub result_count: Vec<usize>,
}

impl MeasurementSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: MeasurementRow) {
        self.timestamp.push(row.timestamp);
        self.inserts_executed.push(row.inserts_executed);
        self.deletes_executed.push(row.deletes_executed);
        self.out_of_bounds.push(row.out_of_bounds);
        self.k.push(row.k);
        self.rebuilt.push(row.rebuilt);
        self.runtime_ms.push(row.runtime_ms);
        self.recall.push(row.recall);
        self.ndcg.push(row.ndcg);
        self.result_count.push(row.result_count);
    }

    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    pub fn row(&self, i: usize) -> Option<MeasurementRow> {
        Some(MeasurementRow {
            timestamp: *self.timestamp.get(i)?,
            inserts_executed: *self.inserts_executed.get(i)?,
            deletes_executed: *self.deletes_executed.get(i)?,
            out_of_bounds: *self.out_of_bounds.get(i)?,
            k: *self.k.get(i)?,
            rebuilt: *self.rebuilt.get(i)?,
            runtime_ms: *self.runtime_ms.get(i)?,
            recall: *self.recall.get(i)?,
            ndcg: *self.ndcg.get(i)?,
            result_count: *self.result_count.get(i)?,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = MeasurementRow> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    pub fn mean_recall(&self) -> Option<f64> {
        mean(&self.recall)
    }

    pub fn mean_runtime_ms(&self) -> Option<f64> {
        mean(&self.runtime_ms)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}
