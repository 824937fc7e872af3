//! Flags shared by the benchmark commands, and how they become a
//! [`RunContext`].

use anyhow::{Context, Result};
use churnbench_core::config::{Backoff, QueryFeed, RunConfig};
use churnbench_core::context::resolve_in;
use churnbench_core::RunContext;
use churnbench_dataset::synthetic::clustered;
use churnbench_dataset::{DatasetOpener, FbinOpener, InMemoryDataset};
use churnbench_store::{IndexType, MemoryStore};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn parse_index(s: &str) -> Result<IndexType, String> {
    s.parse()
}

pub fn parse_feed(s: &str) -> Result<QueryFeed, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "dataset" => Ok(QueryFeed::Dataset),
        "inserted" => Ok(QueryFeed::Inserted),
        other => Err(format!("unknown query feed `{other}` (expected dataset or inserted)")),
    }
}

/// Where corpus and query vectors come from.
#[derive(Args, Debug, Clone, Default)]
pub struct DatasetArgs {
    /// Corpus `.fbin` (relative to --workdir). Synthetic vectors when omitted.
    #[arg(long)]
    pub corpus: Option<PathBuf>,

    /// Query `.fbin` (relative to --workdir). Synthetic vectors when omitted.
    #[arg(long)]
    pub queries: Option<PathBuf>,

    /// Synthetic corpus vectors beyond the preloaded `corpus_size`, available to inserts.
    #[arg(long, default_value_t = 100_000)]
    pub synthetic_extra: usize,

    /// Synthetic query vectors.
    #[arg(long, default_value_t = 1_000)]
    pub synthetic_queries: usize,

    /// Cluster count of synthetic data.
    #[arg(long, default_value_t = 32)]
    pub clusters: usize,
}

impl DatasetArgs {
    /// Corpus and query openers. Synthetic data is drawn as one clustered set
    /// whose tail becomes the queries, so queries sit near corpus clusters
    /// without duplicating corpus records.
    pub fn openers(&self, workdir: &Path, config: &RunConfig) -> Result<(Arc<dyn DatasetOpener>, Arc<dyn DatasetOpener>)> {
        let dim = config.dimension;
        let fbin = |path: &PathBuf| -> Arc<dyn DatasetOpener> { Arc::new(FbinOpener::new(resolve_in(workdir, path), dim)) };
        if let (Some(corpus), Some(queries)) = (&self.corpus, &self.queries) {
            return Ok((fbin(corpus), fbin(queries)));
        }

        let count = usize::try_from(config.corpus_size)
            .context("corpus_size does not fit in memory")?
            .saturating_add(self.synthetic_extra);
        tracing::info!(
            count,
            queries = self.synthetic_queries,
            dim,
            clusters = self.clusters,
            "generating synthetic vectors"
        );
        let mut vectors = clustered(count + self.synthetic_queries, dim, self.clusters, config.seed);
        let tail = vectors.split_off(count);

        let corpus: Arc<dyn DatasetOpener> = match &self.corpus {
            Some(path) => fbin(path),
            None => Arc::new(InMemoryDataset::new(dim, vectors)?.opener()),
        };
        let queries: Arc<dyn DatasetOpener> = match &self.queries {
            Some(path) => fbin(path),
            None => Arc::new(InMemoryDataset::new(dim, tail)?.opener()),
        };
        Ok((corpus, queries))
    }
}

/// Run parameters. Each flag overrides the `--config` file or the built-in default.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// JSON `RunConfig` to start from.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output directory name under `<workdir>/out/` (default: unix millis).
    #[arg(long)]
    pub name: Option<String>,

    /// Entity the benchmark (re)creates.
    #[arg(long)]
    pub entity: Option<String>,

    /// Vector dimension.
    #[arg(long)]
    pub dim: Option<usize>,

    /// Records preloaded before the run.
    #[arg(long)]
    pub corpus_size: Option<u64>,

    /// Run length in seconds (measured from sampler start).
    #[arg(long)]
    pub duration: Option<f64>,

    /// Seconds after sampler start at which the index is rebuilt once.
    #[arg(long)]
    pub rebuild_after: Option<f64>,

    #[arg(long)]
    pub insert_ratio: Option<f64>,

    #[arg(long)]
    pub delete_ratio: Option<f64>,

    /// Lower batch-size bound before ratio scaling.
    #[arg(long)]
    pub min_ops: Option<u64>,

    /// Upper batch-size bound before ratio scaling.
    #[arg(long)]
    pub max_ops: Option<u64>,

    /// Relative jitter applied to inserted vectors.
    #[arg(long)]
    pub jitter: Option<f64>,

    /// Neighbors per query.
    #[arg(short, long)]
    pub k: Option<usize>,

    /// Query parallelism hint.
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Seconds the generators run before sampling starts.
    #[arg(long)]
    pub head_start: Option<f64>,

    /// Insert/delete generator pairs.
    #[arg(long)]
    pub writers: Option<usize>,

    /// `dataset` or `inserted`.
    #[arg(long, value_parser = parse_feed)]
    pub query_feed: Option<QueryFeed>,

    /// Exponential retry backoff starting at this many ms (no backoff when omitted).
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Index poll interval during preparation, in ms.
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// RNG seed (deterministic streams).
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RunArgs {
    pub fn to_config(&self, workdir: &Path, index: IndexType) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let path = resolve_in(workdir, path);
                RunConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
            }
            None => RunConfig::default(),
        };
        config.index_type = index;

        macro_rules! set {
            ($($flag:ident => $field:ident),* $(,)?) => {
                $(if let Some(v) = self.$flag.clone() { config.$field = v; })*
            };
        }
        set! {
            entity => entity,
            dim => dimension,
            corpus_size => corpus_size,
            duration => duration,
            insert_ratio => insert_ratio,
            delete_ratio => delete_ratio,
            jitter => jitter,
            k => k,
            parallel => parallelism,
            head_start => head_start,
            writers => writers,
            query_feed => query_feed,
            poll_ms => index_poll_interval_ms,
            seed => seed,
        }
        if self.name.is_some() {
            config.name = self.name.clone();
        }
        if self.rebuild_after.is_some() {
            config.rebuild_after = self.rebuild_after;
        }
        if let Some(min) = self.min_ops {
            config.operation_bounds.min = min;
        }
        if let Some(max) = self.max_ops {
            config.operation_bounds.max = max;
        }
        if let Some(initial_ms) = self.backoff_ms {
            config.retry.backoff = Backoff::Exponential {
                initial_ms,
                max_ms: initial_ms.saturating_mul(64),
            };
        }
        config.validate()?;
        Ok(config)
    }
}

pub fn context(workdir: &Path, config: RunConfig, datasets: &DatasetArgs) -> Result<RunContext> {
    let (corpus, queries) = datasets.openers(workdir, &config)?;
    Ok(RunContext::new(
        Arc::new(MemoryStore::new()),
        workdir,
        config,
        corpus,
        queries,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = RunArgs {
            duration: Some(12.5),
            k: Some(100),
            min_ops: Some(1),
            max_ops: Some(10),
            query_feed: Some(QueryFeed::Inserted),
            backoff_ms: Some(5),
            ..RunArgs::default()
        };
        let config = args.to_config(Path::new("/tmp"), IndexType::Vaf).unwrap();
        assert_eq!(config.index_type, IndexType::Vaf);
        assert_eq!(config.duration, 12.5);
        assert_eq!(config.k, 100);
        assert_eq!((config.operation_bounds.min, config.operation_bounds.max), (1, 10));
        assert_eq!(config.query_feed, QueryFeed::Inserted);
        assert_eq!(
            config.retry.backoff,
            Backoff::Exponential {
                initial_ms: 5,
                max_ms: 320
            }
        );
        assert_eq!(config.entity, RunConfig::default().entity);
    }

    #[test]
    fn config_file_is_the_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = RunConfig {
            entity: "from.file".into(),
            k: 7,
            ..RunConfig::default()
        };
        std::fs::write(dir.path().join("run.json"), serde_json::to_string(&base).unwrap()).unwrap();
        let args = RunArgs {
            config: Some("run.json".into()),
            k: Some(3),
            ..RunArgs::default()
        };
        let config = args.to_config(dir.path(), IndexType::Pq).unwrap();
        assert_eq!(config.entity, "from.file");
        assert_eq!(config.k, 3);
    }

    #[test]
    fn invalid_flags_are_rejected() {
        let args = RunArgs {
            min_ops: Some(10),
            max_ops: Some(1),
            ..RunArgs::default()
        };
        assert!(args.to_config(Path::new("/tmp"), IndexType::Pq).is_err());
        assert!(RunArgs::default().to_config(Path::new("/tmp"), IndexType::BTree).is_err());
    }

    #[test]
    fn feed_names() {
        assert_eq!(parse_feed("Inserted"), Ok(QueryFeed::Inserted));
        assert!(parse_feed("file").is_err());
        assert_eq!(parse_index("ivfpq"), Ok(IndexType::IvfPq));
    }
}
