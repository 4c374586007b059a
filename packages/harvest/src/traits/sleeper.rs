//! Deliberate waits: backoff and pacing.

use async_trait::async_trait;
use std::time::Duration;

/// Something that can wait.
///
/// Production code uses [`TokioSleeper`]; tests swap in a recorder so retry
/// and pacing schedules are checked without wall-clock delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[async_trait]
impl<S: Sleeper + ?Sized> Sleeper for std::sync::Arc<S> {
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}

/// Sleep unless the token fires first.
pub(crate) async fn sleep_or_cancel(
    sleeper: &dyn Sleeper,
    duration: Duration,
    cancel: &tokio_util::sync::CancellationToken,
) -> crate::error::Result<()> {
    if cancel.is_cancelled() {
        return Err(crate::error::HarvestError::Interrupted);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(crate::error::HarvestError::Interrupted),
        _ = sleeper.sleep(duration) => Ok(()),
    }
}
