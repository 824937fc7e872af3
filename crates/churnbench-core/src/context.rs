//! Everything a run needs, passed explicitly to each component.

use crate::config::RunConfig;
use churnbench_dataset::DatasetOpener;
use churnbench_store::VectorStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store handle, working directory, configuration and datasets for one run.
#[derive(Clone)]
pub struct RunContext {
    pub store: Arc<dyn VectorStore>,
    pub workdir: PathBuf,
    pub config: Arc<RunConfig>,
    /// Preload corpus; insert generators continue where preparation stopped.
    pub corpus: Arc<dyn DatasetOpener>,
    /// Query vectors for the sampler.
    pub queries: Arc<dyn DatasetOpener>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("workdir", &self.workdir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    pub fn new(
        store: Arc<dyn VectorStore>,
        workdir: impl Into<PathBuf>,
        config: RunConfig,
        corpus: Arc<dyn DatasetOpener>,
        queries: Arc<dyn DatasetOpener>,
    ) -> Self {
        Self {
            store,
            workdir: workdir.into(),
            config: Arc::new(config),
            corpus,
            queries,
        }
    }

    /// Resolves `path` against the working directory unless it is absolute.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve_in(&self.workdir, path)
    }

    /// `<workdir>/out/<name>`, or `<workdir>/out/<unix millis>` for unnamed runs.
    pub fn output_dir(&self) -> PathBuf {
        crate::export::output_dir(&self.workdir, self.config.name.as_deref())
    }
}

pub fn resolve_in(workdir: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}
