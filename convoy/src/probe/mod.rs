//! Readiness probing.
//!
//! A [`Probe`] is a narrow boolean check for one external component. The
//! [`ReadinessProber`] polls it until it succeeds, runs out of attempts or is
//! cancelled. Timing out is a reported condition; callers decide severity.

mod checks;

pub use checks::{CommandProbe, TcpProbe};
#[cfg(feature = "http-probe")]
pub use checks::HttpProbe;

use crate::cancellation::CancellationToken;
use crate::clock::{sleep_unless_cancelled, Clock};
use crate::errors::{ConvoyError, Result};
use crate::events::EventSink;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default cadence of "still waiting" log lines.
pub const DEFAULT_LOG_EVERY: u32 = 5;

/// A readiness/health check for one component.
#[async_trait]
pub trait Probe: Send + Sync + Debug {
    /// The component this probe checks.
    fn component(&self) -> &str;

    /// Performs one check. `Err` means "not ready yet".
    async fn check(&self) -> std::result::Result<(), String>;
}

/// Result of waiting for a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// A check succeeded.
    Ready {
        /// Checks performed, including the successful one.
        attempts: u32,
        /// Time spent waiting, per the prober's clock.
        waited_ms: u64,
    },
    /// Every check failed.
    TimedOut {
        /// Checks performed.
        attempts: u32,
        /// Error from the final check.
        last_error: Option<String>,
    },
    /// The caller cancelled the wait.
    Cancelled {
        /// Checks performed before cancellation.
        attempts: u32,
    },
}

impl ProbeOutcome {
    /// Returns true for [`ProbeOutcome::Ready`].
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Number of checks performed.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts, .. }
            | Self::TimedOut { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Polls probes under an injectable clock.
#[derive(Clone)]
pub struct ReadinessProber {
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    log_every: u32,
}

impl ReadinessProber {
    /// Creates a prober.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            clock,
            events,
            cancel,
            log_every: DEFAULT_LOG_EVERY,
        }
    }

    /// Sets the "still waiting" cadence; `0` is treated as `1`.
    #[must_use]
    pub fn with_log_every(mut self, every: u32) -> Self {
        self.log_every = every.max(1);
        self
    }

    /// Waits until `probe` reports ready.
    ///
    /// Performs at most `max_attempts` checks, sleeping `interval` between
    /// them. A check that errors or panics counts as "not ready yet".
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Config`] if `interval` is zero or
    /// `max_attempts` is zero. Timing out is not an error.
    pub async fn wait_ready(
        &self,
        probe: &dyn Probe,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<ProbeOutcome> {
        if interval.is_zero() {
            return Err(ConvoyError::Config(format!(
                "probe '{}': interval must be greater than zero",
                probe.component()
            )));
        }
        if max_attempts == 0 {
            return Err(ConvoyError::Config(format!(
                "probe '{}': max_attempts must be at least 1",
                probe.component()
            )));
        }

        let component = probe.component();
        let started = self.clock.now();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled(component, attempt - 1));
            }

            let checked = AssertUnwindSafe(probe.check()).catch_unwind().await;
            let error = match checked {
                Ok(Ok(())) => {
                    let waited = self.clock.now() - started;
                    let waited_ms = u64::try_from(waited.num_milliseconds()).unwrap_or(0);
                    info!(component, attempt, waited_ms, "Component ready");
                    self.events.emit(
                        "probe.ready",
                        json!({
                            "component": component,
                            "attempt": attempt,
                            "waited_ms": waited_ms,
                        }),
                    );
                    return Ok(ProbeOutcome::Ready {
                        attempts: attempt,
                        waited_ms,
                    });
                }
                Ok(Err(error)) => error,
                Err(_) => "probe check panicked".to_string(),
            };

            if attempt == 1 || attempt % self.log_every == 0 {
                info!(component, attempt, max_attempts, error = %error, "Waiting for component");
                self.events.emit(
                    "probe.waiting",
                    json!({
                        "component": component,
                        "attempt": attempt,
                        "max_attempts": max_attempts,
                        "error": &error,
                    }),
                );
            } else {
                debug!(component, attempt, error = %error, "Component not ready");
            }
            last_error = Some(error);

            if attempt < max_attempts
                && sleep_unless_cancelled(self.clock.as_ref(), interval, &self.cancel)
                    .await
                    .is_err()
            {
                return Ok(self.cancelled(component, attempt));
            }
        }

        warn!(component, attempts = max_attempts, "Component never became ready");
        self.events.emit(
            "probe.timed_out",
            json!({
                "component": component,
                "attempts": max_attempts,
                "last_error": &last_error,
            }),
        );
        Ok(ProbeOutcome::TimedOut {
            attempts: max_attempts,
            last_error,
        })
    }

    fn cancelled(&self, component: &str, attempts: u32) -> ProbeOutcome {
        warn!(component, attempts, "Readiness wait cancelled");
        self.events.emit(
            "probe.cancelled",
            json!({ "component": component, "attempts": attempts }),
        );
        ProbeOutcome::Cancelled { attempts }
    }
}

impl Debug for ReadinessProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessProber")
            .field("log_every", &self.log_every)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::{ManualClock, ScriptedProbe};

    fn prober(clock: &Arc<ManualClock>, sink: &Arc<CollectingEventSink>) -> ReadinessProber {
        ReadinessProber::new(clock.clone(), sink.clone(), Arc::new(CancellationToken::new()))
    }

    #[tokio::test]
    async fn test_ready_on_first_attempt() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingEventSink::new());
        let probe = ScriptedProbe::ready_after("clickhouse", 0);

        let outcome = prober(&clock, &sink)
            .wait_ready(&probe, Duration::from_secs(2), 10)
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::Ready { attempts: 1, waited_ms: 0 });
        assert_eq!(probe.calls(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_ready_after_failures_sleeps_between_attempts() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingEventSink::new());
        let probe = ScriptedProbe::ready_after("kafka", 3);

        let outcome = prober(&clock, &sink)
            .wait_ready(&probe, Duration::from_secs(2), 10)
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::Ready { attempts: 4, waited_ms: 6000 });
        assert_eq!(probe.calls(), 4);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 3]);
    }

    #[tokio::test]
    async fn test_times_out_after_max_attempts() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingEventSink::new());
        let probe = ScriptedProbe::never_ready("redis");

        let outcome = prober(&clock, &sink)
            .wait_ready(&probe, Duration::from_millis(500), 4)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ProbeOutcome::TimedOut {
                attempts: 4,
                last_error: Some("redis not ready".to_string()),
            }
        );
        assert_eq!(probe.calls(), 4);
        assert_eq!(clock.sleeps().len(), 3);
        assert_eq!(sink.events_of_type("probe.timed_out").len(), 1);
    }

    #[tokio::test]
    async fn test_waiting_log_is_throttled() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingEventSink::new());
        let probe = ScriptedProbe::never_ready("clickhouse");

        prober(&clock, &sink)
            .wait_ready(&probe, Duration::from_secs(1), 12)
            .await
            .unwrap();

        let attempts: Vec<u64> = sink
            .events_of_type("probe.waiting")
            .iter()
            .map(|(_, data)| data["attempt"].as_u64().unwrap())
            .collect();
        assert_eq!(attempts, vec![1, 5, 10]);
    }

    #[tokio::test]
    async fn test_panicking_check_is_not_ready() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingEventSink::new());
        let probe = ScriptedProbe::panics("flaky");

        let outcome = prober(&clock, &sink)
            .wait_ready(&probe, Duration::from_secs(1), 2)
            .await
            .unwrap();

        assert!(matches!(outcome, ProbeOutcome::TimedOut { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let clock = Arc::new(ManualClock::new());
        let cancel = Arc::new(CancellationToken::new());
        cancel.cancel("operator abort");
        let probe = ScriptedProbe::never_ready("kafka");

        let outcome = ReadinessProber::new(clock, Arc::new(CollectingEventSink::new()), cancel)
            .wait_ready(&probe, Duration::from_secs(1), 5)
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::Cancelled { attempts: 0 });
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingEventSink::new());
        let probe = ScriptedProbe::ready_after("kafka", 0);
        let prober = prober(&clock, &sink);

        assert!(prober.wait_ready(&probe, Duration::ZERO, 3).await.is_err());
        assert!(prober.wait_ready(&probe, Duration::from_secs(1), 0).await.is_err());
        assert_eq!(probe.calls(), 0);
    }
}
