//! Churnbench CLI
//!
//! - `adaptiveness`: concurrent insert/delete load while sampling index quality
//! - `quality`: recall/nDCG of an index at power-of-two cut-offs, no mutation
//! - `synthesize`: write clustered `.fbin` corpus and query files
//!
//! ```bash
//! churnbench --workdir bench synthesize --out datasets --count 200000 --queries 1000 --dim 96
//! churnbench --workdir bench adaptiveness PQ --corpus datasets/base.fbin \
//!     --queries datasets/query.fbin --corpus-size 100000 --duration 600 --rebuild-after 300
//! ```

use anyhow::{anyhow, Context, Result};
use churnbench_core::context::resolve_in;
use churnbench_core::driver::RunReport;
use churnbench_core::quality::{levels, SweepReport};
use churnbench_core::{run_adaptiveness, run_quality, SweepConfig};
use churnbench_dataset::synthetic::clustered;
use churnbench_dataset::write_fbin;
use churnbench_store::IndexType;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

mod bench;
mod tracing_setup;

use bench::{parse_index, DatasetArgs, RunArgs};

#[derive(Parser)]
#[command(name = "churnbench")]
#[command(author, version, about = "Churnbench: vector index adaptiveness benchmarks")]
struct Cli {
    /// Working directory; relative dataset, config and output paths resolve against it.
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mutate the collection concurrently while sampling index quality and latency.
    ///
    /// Runs against the in-process reference store: the entity is recreated,
    /// preloaded and indexed, then insert/delete generators churn it while the
    /// sampler compares indexed and exact queries until `--duration` elapses.
    Adaptiveness {
        /// Index type under test (VAF, PQ, IVFPQ).
        #[arg(value_parser = parse_index)]
        index: IndexType,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        data: DatasetArgs,
    },

    /// Recall and nDCG of a freshly built index at k = 1, 2, 4, ... max-k.
    Quality {
        /// Index type under test (VAF, PQ, IVFPQ).
        #[arg(value_parser = parse_index)]
        index: IndexType,

        /// Number of query vectors.
        #[arg(long, default_value_t = 100)]
        repeat: usize,

        /// Result limit; the largest evaluated level.
        #[arg(long, default_value_t = 1000)]
        max_k: usize,

        /// Query parallelism hint for both queries.
        #[arg(long, default_value_t = 32)]
        sweep_parallel: usize,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        data: DatasetArgs,
    },

    /// Write a synthetic clustered corpus and query set in `.fbin` format.
    Synthesize {
        /// Output directory (relative to --workdir).
        #[arg(long, default_value = "datasets")]
        out: PathBuf,

        /// Corpus vectors.
        #[arg(long, default_value_t = 100_000)]
        count: usize,

        /// Query vectors.
        #[arg(long, default_value_t = 1_000)]
        queries: usize,

        #[arg(long, default_value_t = 96)]
        dim: usize,

        #[arg(long, default_value_t = 32)]
        clusters: usize,

        /// RNG seed (deterministic).
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_setup::init(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Adaptiveness { index, run, data } => {
            let config = run.to_config(&cli.workdir, index)?;
            let ctx = bench::context(&cli.workdir, config, &data)?;
            let report = runtime()?.block_on(run_adaptiveness(ctx))?;
            print_run(&report);
        }
        Commands::Quality {
            index,
            repeat,
            max_k,
            sweep_parallel,
            run,
            data,
        } => {
            let config = run.to_config(&cli.workdir, index)?;
            let ctx = bench::context(&cli.workdir, config, &data)?;
            let sweep = SweepConfig {
                repeat,
                max_k,
                parallelism: sweep_parallel,
            };
            let report = runtime()?.block_on(async { run_quality(&ctx, &sweep).await })?;
            print_sweep(&report, &sweep);
        }
        Commands::Synthesize {
            out,
            count,
            queries,
            dim,
            clusters,
            seed,
        } => {
            let out = resolve_in(&cli.workdir, out);
            cmd_synthesize(&out, count, queries, dim, clusters, seed)?;
        }
    }
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))
}

fn cmd_synthesize(out: &Path, count: usize, queries: usize, dim: usize, clusters: usize, seed: u64) -> Result<()> {
    if dim == 0 {
        return Err(anyhow!("--dim must be > 0"));
    }
    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let mut vectors = clustered(count + queries, dim, clusters, seed);
    let tail = vectors.split_off(count);

    let base = out.join("base.fbin");
    let query = out.join("query.fbin");
    write_fbin(&base, dim, &vectors).with_context(|| format!("writing {}", base.display()))?;
    write_fbin(&query, dim, &tail).with_context(|| format!("writing {}", query.display()))?;
    eprintln!("{} {} ({count} × {dim})", "wrote".green().bold(), base.display().to_string().bold());
    eprintln!("{} {} ({queries} × {dim})", "wrote".green().bold(), query.display().to_string().bold());
    Ok(())
}

fn print_run(report: &RunReport) {
    let s = &report.summary;
    println!("{} phase {}", "ok".green().bold(), report.phase);
    println!("  {} {} rows ({} failed, {} skipped)", "→".yellow(), s.rows, s.failed_samples, s.skipped_samples);
    println!(
        "  {} {} inserted, {} deleted, {} out of bounds",
        "→".yellow(),
        s.counters.inserts_executed,
        s.counters.deletes_executed,
        s.counters.out_of_bounds
    );
    println!(
        "  {} rebuild {}",
        "→".yellow(),
        if s.rebuild_fired { "fired" } else { "not fired" }
    );
    if let (Some(recall), Some(ms)) = (s.mean_recall, s.mean_runtime_ms) {
        println!("  {} mean recall {recall:.4}, mean latency {ms:.3} ms", "→".yellow());
    }
    if let Some(dir) = &report.output {
        println!("{} {}", "wrote".green().bold(), dir.display().to_string().bold());
    }
}

fn print_sweep(report: &SweepReport, sweep: &SweepConfig) {
    println!("{} {} queries", "ok".green().bold(), report.queries);
    for level in levels(sweep.max_k) {
        if let Some(recall) = report.series.mean_recall_at(level) {
            println!("  {} recall@{level:<5} {recall:.4}", "→".yellow());
        }
    }
    if let Some(dir) = &report.output {
        println!("{} {}", "wrote".green().bold(), dir.display().to_string().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_adaptiveness_flags() {
        let cli = Cli::try_parse_from([
            "churnbench",
            "--workdir",
            "/tmp/wd",
            "-vv",
            "adaptiveness",
            "ivfpq",
            "--duration",
            "30",
            "--rebuild-after",
            "10",
            "--query-feed",
            "inserted",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.workdir, PathBuf::from("/tmp/wd"));
        match cli.command {
            Commands::Adaptiveness { index, run, .. } => {
                assert_eq!(index, IndexType::IvfPq);
                assert_eq!(run.duration, Some(30.0));
                assert_eq!(run.rebuild_after, Some(10.0));
            }
            _ => panic!("expected adaptiveness"),
        }
    }

    #[test]
    fn rejects_unknown_index() {
        assert!(Cli::try_parse_from(["churnbench", "quality", "hnsw"]).is_err());
    }

    #[test]
    fn synthesize_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        cmd_synthesize(dir.path(), 20, 5, 3, 2, 9).unwrap();
        let base = churnbench_dataset::FbinReader::open(dir.path().join("base.fbin"), 3).unwrap();
        assert_eq!(churnbench_dataset::DatasetSource::size(&base), 20);
        let query = churnbench_dataset::FbinReader::open(dir.path().join("query.fbin"), 3).unwrap();
        assert_eq!(churnbench_dataset::DatasetSource::size(&query), 5);
    }
}
