//! One-shot delayed index rebuild.

use crate::signal::RunSignal;
use crate::state::MutationState;
use churnbench_store::{IndexHandle, RebuildMode, VectorStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub struct RebuildTrigger {
    store: Arc<dyn VectorStore>,
    state: Arc<MutationState>,
    index: IndexHandle,
    signal: RunSignal,
    offset: Duration,
}

impl RebuildTrigger {
    pub fn new(
        store: Arc<dyn VectorStore>,
        state: Arc<MutationState>,
        index: IndexHandle,
        signal: RunSignal,
        offset: Duration,
    ) -> Self {
        Self {
            store,
            state,
            index,
            signal,
            offset,
        }
    }

    /// Waits until `offset` after `start`, then requests an asynchronous rebuild.
    ///
    /// Returns whether this trigger fired. It does not fire when the run stops
    /// first or when the rebuilt flag was already set.
    pub async fn run(self, start: Instant) -> bool {
        let deadline = start + self.offset;
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = self.signal.stopped() => {
                tracing::debug!(index = %self.index, "run ended before the rebuild offset");
                return false;
            }
        }
        if !self.state.mark_rebuilt() {
            return false;
        }
        tracing::info!(
            index = %self.index,
            after_secs = self.offset.as_secs_f64(),
            "requesting asynchronous index rebuild"
        );
        if let Err(err) = self.store.rebuild_index(&self.index, RebuildMode::Async).await {
            tracing::warn!(index = %self.index, error = %err, "index rebuild request failed");
        }
        true
    }
}
