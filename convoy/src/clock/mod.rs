//! Injectable time source.
//!
//! The prober's inter-attempt sleep and the executor's backoff sleep are the
//! only suspension points in the coordinator; both go through [`Clock`] so
//! tests can drive them with [`crate::testing::ManualClock`] instead of
//! wall-clock time.

use crate::cancellation::CancellationToken;
use crate::errors::{ConvoyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Source of the current time and of sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspends for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeps on `clock`, returning early with [`ConvoyError::Cancelled`] if the
/// token fires first.
pub async fn sleep_unless_cancelled(
    clock: &dyn Clock,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(cancelled(cancel));
    }
    tokio::select! {
        () = clock.sleep(duration) => Ok(()),
        () = cancel.cancelled() => Err(cancelled(cancel)),
    }
}

fn cancelled(cancel: &CancellationToken) -> ConvoyError {
    ConvoyError::Cancelled(cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}
