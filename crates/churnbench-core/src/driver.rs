//! Adaptiveness run driver.
//!
//! ```text
//!  INIT ──► PREPARE ──► RUNNING ──► DRAIN ──► EXPORT ──► DONE
//!              │                                 │
//!              └────────────► FAILED ◄───────────┘
//!
//!  RUNNING:
//!    t=0            writers × (insert + delete) generators start
//!    t=head_start   sampler + rebuild trigger start (run clock = 0)
//!    t=+duration    sampler stops the run signal -> DRAIN joins everything
//! ```

use crate::config::{QueryFeed, RunConfig};
use crate::context::RunContext;
use crate::error::BenchResult;
use crate::export::{write_json_new, MEASUREMENTS_FILE, RUN_FILE};
use crate::feed::QueryQueue;
use crate::generators::{DeleteGenerator, GeneratorEnv, GeneratorKind, GeneratorReport, InsertGenerator};
use crate::prepare::prepare;
use crate::rebuild::RebuildTrigger;
use crate::recorder::MeasurementSeries;
use crate::sampler::{QuerySupply, Sampler};
use crate::signal::RunSignal;
use crate::state::CounterSnapshot;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunPhase {
    Init,
    Prepare,
    Running,
    Drain,
    Export,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Init => "INIT",
            RunPhase::Prepare => "PREPARE",
            RunPhase::Running => "RUNNING",
            RunPhase::Drain => "DRAIN",
            RunPhase::Export => "EXPORT",
            RunPhase::Done => "DONE",
            RunPhase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Final numbers of a run, written to `run.json`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub loaded: u64,
    pub rows: usize,
    pub failed_samples: u64,
    pub skipped_samples: u64,
    pub rebuild_fired: bool,
    pub elapsed_secs: f64,
    pub counters: CounterSnapshot,
    pub inserts: GeneratorReport,
    pub deletes: GeneratorReport,
    /// Generator tasks that panicked or were cancelled instead of returning a report.
    pub generator_failures: usize,
    pub mean_recall: Option<f64>,
    pub mean_runtime_ms: Option<f64>,
}

#[derive(Debug)]
pub struct RunReport {
    pub phase: RunPhase,
    pub series: MeasurementSeries,
    pub summary: RunSummary,
    pub output: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunFile<'a> {
    config: &'a RunConfig,
    summary: &'a RunSummary,
}

/// Derives an independent RNG seed for stream `n` of a run.
pub fn stream_seed(seed: u64, n: u64) -> u64 {
    seed ^ n.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Drives one adaptiveness benchmark through its phases.
pub struct AdaptivenessRun {
    ctx: RunContext,
    phase: RunPhase,
}

impl AdaptivenessRun {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            phase: RunPhase::Init,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, next: RunPhase) {
        tracing::info!(from = %self.phase, to = %next, entity = %self.ctx.config.entity, "run phase");
        self.phase = next;
    }

    /// PREPARE through DRAIN. Nothing is written to disk.
    pub async fn execute(&mut self) -> BenchResult<RunReport> {
        if let Err(err) = self.ctx.config.validate() {
            self.transition(RunPhase::Failed);
            return Err(err);
        }

        self.transition(RunPhase::Prepare);
        let prepared = match prepare(&self.ctx).await {
            Ok(p) => p,
            Err(err) => {
                tracing::error!(error = %err, "preparation failed");
                self.transition(RunPhase::Failed);
                return Err(err);
            }
        };

        self.transition(RunPhase::Running);
        let config = self.ctx.config.clone();
        let signal = RunSignal::new();
        let state = Arc::new(prepared.state);
        let queue = Arc::new(QueryQueue::default());
        let env = GeneratorEnv {
            store: self.ctx.store.clone(),
            config: config.clone(),
            state: state.clone(),
            stats: Arc::new(prepared.stats),
            signal: signal.clone(),
        };
        let feed = (config.query_feed == QueryFeed::Inserted).then(|| queue.clone());

        let mut generators: Vec<(GeneratorKind, JoinHandle<GeneratorReport>)> = Vec::new();
        for worker in 0..config.writers {
            let insert = InsertGenerator::new(
                worker,
                env.clone(),
                prepared.source.clone(),
                feed.clone(),
                stream_seed(config.seed, 2 * worker as u64),
            );
            let delete = DeleteGenerator::new(worker, env.clone(), stream_seed(config.seed, 2 * worker as u64 + 1));
            generators.push((GeneratorKind::Insert, tokio::spawn(insert.run())));
            generators.push((GeneratorKind::Delete, tokio::spawn(delete.run())));
        }
        tracing::info!(writers = config.writers, head_start_secs = config.head_start, "generators started");

        if !config.head_start().is_zero() {
            tokio::time::sleep(config.head_start()).await;
        }

        let start = Instant::now();
        let trigger = config.rebuild_offset().map(|offset| {
            let trigger = RebuildTrigger::new(
                self.ctx.store.clone(),
                state.clone(),
                prepared.index.clone(),
                signal.clone(),
                offset,
            );
            tokio::spawn(trigger.run(start))
        });
        let supply = QuerySupply::for_feed(config.query_feed, self.ctx.queries.clone(), queue);
        let sampler = Sampler::new(
            self.ctx.store.clone(),
            config.clone(),
            state.clone(),
            supply,
            signal.clone(),
            stream_seed(config.seed, u64::MAX - 1),
        );
        let sampled = tokio::spawn(sampler.run(start)).await;

        self.transition(RunPhase::Drain);
        signal.stop();
        let mut summary = RunSummary {
            loaded: prepared.loaded,
            ..RunSummary::default()
        };
        for (kind, handle) in generators {
            match handle.await {
                Ok(report) => match kind {
                    GeneratorKind::Insert => summary.inserts.merge(&report),
                    GeneratorKind::Delete => summary.deletes.merge(&report),
                },
                Err(err) => {
                    summary.generator_failures += 1;
                    tracing::error!(op = kind.as_str(), error = %err, "generator task failed");
                }
            }
        }
        if let Some(handle) = trigger {
            match handle.await {
                Ok(fired) => summary.rebuild_fired = fired,
                Err(err) => tracing::error!(error = %err, "rebuild trigger task failed"),
            }
        }

        let sampled = match sampled {
            Ok(report) => report,
            Err(err) => {
                self.transition(RunPhase::Failed);
                return Err(err.into());
            }
        };

        summary.rows = sampled.series.len();
        summary.failed_samples = sampled.failed;
        summary.skipped_samples = sampled.skipped;
        summary.elapsed_secs = sampled.elapsed.as_secs_f64();
        summary.counters = state.snapshot();
        summary.mean_recall = sampled.series.mean_recall();
        summary.mean_runtime_ms = sampled.series.mean_runtime_ms();
        tracing::info!(
            rows = summary.rows,
            inserts = summary.counters.inserts_executed,
            deletes = summary.counters.deletes_executed,
            out_of_bounds = summary.counters.out_of_bounds,
            rebuilt = summary.counters.index_rebuilt,
            mean_recall = ?summary.mean_recall,
            "run drained"
        );

        Ok(RunReport {
            phase: self.phase,
            series: sampled.series,
            summary,
            output: None,
        })
    }

    /// Writes `measurements.json` and `run.json` into `dir`.
    pub fn export(&mut self, report: &mut RunReport, dir: &Path) -> BenchResult<()> {
        self.transition(RunPhase::Export);
        let written = write_json_new(&dir.join(MEASUREMENTS_FILE), "measurements", &report.series).and_then(|()| {
            write_json_new(
                &dir.join(RUN_FILE),
                "run summary",
                &RunFile {
                    config: &self.ctx.config,
                    summary: &report.summary,
                },
            )
        });
        if let Err(err) = written {
            self.transition(RunPhase::Failed);
            report.phase = RunPhase::Failed;
            return Err(err);
        }
        self.transition(RunPhase::Done);
        report.phase = RunPhase::Done;
        report.output = Some(dir.to_path_buf());
        tracing::info!(dir = %dir.display(), "results exported");
        Ok(())
    }

    /// Full run, exporting into [`RunContext::output_dir`].
    pub async fn run(mut self) -> BenchResult<RunReport> {
        let mut report = self.execute().await?;
        let dir = self.ctx.output_dir();
        self.export(&mut report, &dir)?;
        Ok(report)
    }
}

/// Convenience wrapper: run and export with `ctx`.
pub async fn run_adaptiveness(ctx: RunContext) -> BenchResult<RunReport> {
    AdaptivenessRun::new(ctx).run().await
}
