//! Resubmission of mutation batches on `ResourceExhausted`.
//!
//! There is no attempt limit: a store that stays saturated stalls the batch
//! instead of failing it. [`RetryPolicy::cancel_aware`] lets the loop give up
//! once the run is draining.

use crate::config::RetryPolicy;
use crate::signal::RunSignal;
use churnbench_store::{StoreError, StoreResult};
use std::future::Future;

#[derive(Debug)]
pub enum Submission<T> {
    Done { value: T, retries: u32 },
    Failed { error: StoreError, retries: u32 },
    /// The run stopped while the batch was still being retried.
    Cancelled { retries: u32 },
}

impl<T> Submission<T> {
    pub fn retries(&self) -> u32 {
        match self {
            Submission::Done { retries, .. }
            | Submission::Failed { retries, .. }
            | Submission::Cancelled { retries } => *retries,
        }
    }
}

/// Calls `submit` until it succeeds or fails with a non-retryable error.
pub async fn submit_with_retry<T, F, Fut>(
    op: &'static str,
    policy: &RetryPolicy,
    signal: &RunSignal,
    mut submit: F,
) -> Submission<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut retries = 0u32;
    loop {
        match submit().await {
            Ok(value) => return Submission::Done { value, retries },
            Err(error) if error.is_retryable() => {
                retries = retries.saturating_add(1);
                tracing::trace!(op, retries, error = %error, "store busy; resubmitting batch");
                if policy.cancel_aware && !signal.is_running() {
                    return Submission::Cancelled { retries };
                }
                match policy.delay(retries) {
                    Some(delay) if policy.cancel_aware => {
                        signal.sleep(delay).await;
                    }
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => tokio::task::yield_now().await,
                }
            }
            Err(error) => return Submission::Failed { error, retries },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn busy_then_ok(failures: u32, calls: &AtomicU32) -> StoreResult<u32> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(StoreError::ResourceExhausted("busy".into()))
        } else {
            Ok(n)
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = &AtomicU32::new(0);
        let signal = RunSignal::new();
        let out = submit_with_retry("insert", &RetryPolicy::default(), &signal, move || async move {
            busy_then_ok(5, calls)
        })
        .await;
        assert!(matches!(out, Submission::Done { value: 5, retries: 5 }));
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let signal = RunSignal::new();
        let out = submit_with_retry("delete", &RetryPolicy::default(), &signal, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StoreError::Internal("boom".into()))
        })
        .await;
        assert!(matches!(out, Submission::Failed { retries: 0, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_aware_retry_stops_with_the_run() {
        let signal = RunSignal::new();
        signal.stop();
        let out = submit_with_retry("insert", &RetryPolicy::default(), &signal, || async {
            Err::<(), _>(StoreError::ResourceExhausted("busy".into()))
        })
        .await;
        assert!(matches!(out, Submission::Cancelled { retries: 1 }));
    }

    #[tokio::test]
    async fn faithful_policy_keeps_retrying_after_stop() {
        let calls = &AtomicU32::new(0);
        let signal = RunSignal::new();
        signal.stop();
        let policy = RetryPolicy {
            backoff: Backoff::Exponential { initial_ms: 1, max_ms: 2 },
            cancel_aware: false,
        };
        let out = submit_with_retry("insert", &policy, &signal, move || async move { busy_then_ok(3, calls) }).await;
        assert_eq!(out.retries(), 3);
        assert!(matches!(out, Submission::Done { .. }));
    }
}
