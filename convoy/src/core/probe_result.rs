//! Per-component health result.

use super::ProbeStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The result of probing or verifying one component.
///
/// Immutable once created; verifiers write one of these as their artifact.
/// Top-level fields beyond the four known ones are kept in `extra` and
/// written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// The component name.
    #[serde(default)]
    pub component: String,
    /// The reported status.
    pub status: ProbeStatus,
    /// When the result was produced; absent if the artifact had none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Component-specific structured payload.
    #[serde(default)]
    pub detail: Value,
    /// Any other top-level fields of the artifact.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProbeResult {
    /// Creates a result stamped with the current time.
    #[must_use]
    pub fn new(component: impl Into<String>, status: ProbeStatus, detail: Value) -> Self {
        Self::at(component, status, Utc::now(), detail)
    }

    /// Creates a result with an explicit timestamp.
    #[must_use]
    pub fn at(
        component: impl Into<String>,
        status: ProbeStatus,
        timestamp: DateTime<Utc>,
        detail: Value,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            timestamp: Some(timestamp),
            detail,
            extra: Map::new(),
        }
    }

    /// Shorthand for an `ok` result.
    #[must_use]
    pub fn ok(component: impl Into<String>, detail: Value) -> Self {
        Self::new(component, ProbeStatus::Ok, detail)
    }

    /// Shorthand for an `error` result with a message.
    #[must_use]
    pub fn error(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            component,
            ProbeStatus::Error,
            serde_json::json!({ "message": message.into() }),
        )
    }

    /// Shorthand for a `skipped` result with a message.
    #[must_use]
    pub fn skipped(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            component,
            ProbeStatus::Skipped,
            serde_json::json!({ "message": message.into() }),
        )
    }

    /// Returns the `detail.message` string, if present.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.detail.get("message").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_artifact() {
        let raw = r#"{
            "component": "kafka",
            "status": "ok",
            "timestamp": "2024-05-01T10:00:00Z",
            "detail": {"topics": 4, "consumer_lag": 0}
        }"#;

        let result: ProbeResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.component, "kafka");
        assert_eq!(result.status, ProbeStatus::Ok);
        assert_eq!(result.detail["topics"], json!(4));
        assert_eq!(
            result.timestamp.unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );
        assert!(result.extra.is_empty());
    }

    #[test]
    fn test_parse_minimal_artifact() {
        let result: ProbeResult = serde_json::from_str(r#"{"status": "success"}"#).unwrap();
        assert_eq!(result.status, ProbeStatus::Ok);
        assert!(result.component.is_empty());
        assert!(result.detail.is_null());
        assert!(result.timestamp.is_none());
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "component": "kafka",
            "status": "ok",
            "detail": {"lag": 0},
            "rows_ingested": 42,
            "checks": ["topics", "lag"],
        });

        let result: ProbeResult = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(result.extra["rows_ingested"], json!(42));
        assert_eq!(serde_json::to_value(&result).unwrap(), raw);
    }

    #[test]
    fn test_missing_status_is_rejected() {
        assert!(serde_json::from_str::<ProbeResult>(r#"{"component": "redis"}"#).is_err());
    }

    #[test]
    fn test_helpers() {
        let skipped = ProbeResult::skipped("redis", "no report produced");
        assert_eq!(skipped.status, ProbeStatus::Skipped);
        assert_eq!(skipped.message(), Some("no report produced"));

        let error = ProbeResult::error("redis", "connection refused");
        assert!(error.status.is_error());
    }
}
