//! The shared "running" flag.
//!
//! Generators check it once per iteration. Sleeps taken through
//! [`RunSignal::sleep`] end early when the flag drops, so DRAIN does not wait out
//! a full pause.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct RunSignal {
    running: Arc<watch::Sender<bool>>,
}

impl Default for RunSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { running: Arc::new(tx) }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Clears the flag. Idempotent.
    pub fn stop(&self) {
        self.running.send_replace(false);
    }

    /// Resolves once the flag has been cleared.
    pub async fn stopped(&self) {
        let mut rx = self.running.subscribe();
        loop {
            let running = *rx.borrow_and_update();
            if !running {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleeps for `duration` or until the flag is cleared. Returns whether the
    /// run is still active afterwards.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stopped() => {}
        }
        self.is_running()
    }
}
