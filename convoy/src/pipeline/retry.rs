//! Retry policy with bounded exponential backoff.
//!
//! The delay after attempt `k` (1-indexed) is
//! `min(initial_delay * backoff_multiplier^(k-1), max_delay)`.

use crate::errors::{ContractErrorInfo, PipelineValidationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    /// Growth factor applied per attempt. Always at least 1.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy (3 attempts, 1s doubling, 30s cap).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that tries once and never retries.
    #[must_use]
    pub fn once() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Computes the delay to wait after attempt `attempt` (1-indexed) fails.
    ///
    /// Attempt `0` is treated as attempt `1`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        let initial = self.initial_delay.as_secs_f64();
        let cap = self.max_delay.as_secs_f64();
        let scaled = initial * factor;

        if !scaled.is_finite() || scaled >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    /// The full delay schedule: one entry per retry (`max_attempts - 1`).
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|k| self.delay_after(k)).collect()
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_attempts` is zero, the multiplier is below 1
    /// or not finite, or `max_delay` is smaller than `initial_delay`.
    pub fn validate(&self, owner: &str) -> Result<(), PipelineValidationError> {
        let problem = if self.max_attempts == 0 {
            Some("max_attempts must be at least 1".to_string())
        } else if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            Some(format!(
                "backoff_multiplier must be a finite number >= 1 (got {})",
                self.backoff_multiplier
            ))
        } else if self.max_delay < self.initial_delay {
            Some("max_delay must not be smaller than initial_delay".to_string())
        } else {
            None
        };

        match problem {
            None => Ok(()),
            Some(problem) => Err(PipelineValidationError::new(format!(
                "Invalid retry policy for '{owner}': {problem}"
            ))
            .with_stages(vec![owner.to_string()])
            .with_error_info(ContractErrorInfo::new("CONVOY-004-POLICY", problem))),
        }
    }
}

/// Serializes durations as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!(policy.validate("default").is_ok());
    }

    #[test]
    fn test_delay_exponential() {
        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_max_attempts(20)
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(3.0)
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay_after(2), Duration::from_secs(3));
        assert_eq!(policy.delay_after(3), Duration::from_secs(5));
        assert_eq!(policy.delay_after(19), Duration::from_secs(5));
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_matches_formula_for_every_attempt() {
        let policies = [
            RetryPolicy::new(),
            RetryPolicy::new()
                .with_max_attempts(8)
                .with_initial_delay(Duration::from_millis(250))
                .with_backoff_multiplier(1.5)
                .with_max_delay(Duration::from_secs(4)),
            RetryPolicy::new()
                .with_max_attempts(4)
                .with_backoff_multiplier(1.0)
                .with_max_delay(Duration::from_secs(1)),
        ];

        for policy in policies {
            for k in 1..=policy.max_attempts {
                let expected = (policy.initial_delay.as_secs_f64()
                    * policy.backoff_multiplier.powi(i32::try_from(k - 1).unwrap()))
                .min(policy.max_delay.as_secs_f64());
                let actual = policy.delay_after(k).as_secs_f64();
                assert!(
                    (actual - expected).abs() < 1e-9,
                    "attempt {k}: expected {expected}, got {actual}"
                );
            }
        }
    }

    #[test]
    fn test_schedule_has_one_entry_per_retry() {
        let policy = RetryPolicy::new().with_max_attempts(4);
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert!(RetryPolicy::once().schedule().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        let zero = RetryPolicy::new().with_max_attempts(0);
        let err = zero.validate("load").unwrap_err();
        assert_eq!(err.code(), Some("CONVOY-004-POLICY"));

        assert!(RetryPolicy::new()
            .with_backoff_multiplier(0.5)
            .validate("load")
            .is_err());
        assert!(RetryPolicy::new()
            .with_backoff_multiplier(f64::NAN)
            .validate("load")
            .is_err());
        assert!(RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1))
            .validate("load")
            .is_err());
    }

    #[test]
    fn test_serde_uses_milliseconds() {
        let policy = RetryPolicy::new().with_initial_delay(Duration::from_millis(1500));
        let json = serde_json::to_value(policy).unwrap();
        assert_eq!(json["initial_delay"], serde_json::json!(1500));
        assert_eq!(json["max_delay"], serde_json::json!(30000));

        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }
}
