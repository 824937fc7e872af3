//! Churnbench engine
//!
//! Measures how a vector index degrades and recovers while the collection it
//! covers is mutated underneath it.
//!
//! ```text
//!            ┌──────────────────────── RunContext ───────────────────────────┐
//!            │ store: Arc<dyn VectorStore>   config: Arc<RunConfig>          │
//!            │ corpus / queries: Arc<dyn DatasetOpener>   workdir            │
//!            └───────────────────────────────────────────────────────────────┘
//!
//!   prepare ──► N × InsertGenerator ──┐
//!               N × DeleteGenerator ──┼──► MutationState (atomics, deleted ids)
//!               RebuildTrigger ───────┘            │ snapshot per sample
//!                                                  ▼
//!               Sampler ── indexed + exact query ──► measures ──► MeasurementSeries
//!                                                                      │
//!                                                     export ◄─────────┘
//! ```
//!
//! [`driver::AdaptivenessRun`] walks a run through its phases; [`quality`]
//! holds the mutation-free index-quality sweep.

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod export;
pub mod feed;
pub mod generators;
pub mod measures;
pub mod prepare;
pub mod quality;
pub mod rebuild;
pub mod recorder;
pub mod retry;
pub mod sampler;
pub mod signal;
pub mod state;

pub use config::{Backoff, OperationBounds, PauseRange, QueryFeed, RetryPolicy, RunConfig};
pub use context::RunContext;
pub use driver::{run_adaptiveness, AdaptivenessRun, RunPhase, RunReport, RunSummary};
pub use error::{BenchError, BenchResult};
pub use measures::Quality;
pub use quality::{run_quality, QualitySeries, SweepConfig, SweepReport};
pub use recorder::{MeasurementRow, MeasurementSeries};
pub use state::{CounterSnapshot, FeatureStatistics, MutationState};
