//! Retry utilities: backoff presets and bounded waits.
//!
//! Uses `backon` for exponential backoff with jitter. The engine never
//! retries a `Conflict` itself; [`conflict_backoff`] is for callers that
//! re-read state and try again.

use std::future::Future;
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::backend::BackendError;

/// Backoff while waiting for backend-side provisioning (table creation).
///
/// - Min delay: 250ms
/// - Max delay: 10s
/// - Max attempts: 60
/// - Jitter enabled
pub fn provisioning_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(250))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(60)
        .with_jitter()
}

/// Backoff for caller-side retries of conflicting appends.
///
/// - Min delay: 10ms
/// - Max delay: 2s
/// - Max attempts: 10
/// - Jitter enabled
pub fn conflict_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(10)
        .with_jitter()
}

#[derive(Debug)]
enum Probe {
    Pending,
    Failed(BackendError),
}

/// Poll `probe` until it reports ready.
///
/// Waits between polls follow `backoff`. Gives up with
/// `BackendError::Timeout` when `deadline` passes or the backoff is
/// exhausted; a probe error aborts immediately.
pub async fn wait_until<F, Fut>(
    what: &str,
    deadline: Duration,
    backoff: ExponentialBuilder,
    mut probe: F,
) -> Result<(), BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, BackendError>>,
{
    let started = Instant::now();

    let attempt = (|| {
        let ready = probe();
        async move {
            match ready.await {
                Ok(true) => Ok(()),
                Ok(false) => Err(Probe::Pending),
                Err(e) => Err(Probe::Failed(e)),
            }
        }
    })
    .retry(backoff)
    .when(|e| matches!(e, Probe::Pending))
    .notify(|_, delay: Duration| {
        debug!(what = %what, delay = ?delay, "Not ready, waiting");
    });

    match tokio::time::timeout(deadline, attempt).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(Probe::Failed(e))) => Err(e),
        Ok(Err(Probe::Pending)) | Err(_) => Err(BackendError::Timeout {
            what: what.to_string(),
            elapsed: started.elapsed(),
        }),
    }
}
