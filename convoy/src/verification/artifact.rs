//! Reading verifier artifacts.

use crate::core::{ProbeResult, ProbeStatus};
use crate::errors::FailureKind;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::io;
use std::path::Path;

/// Detail message for a verifier that left no artifact.
pub const NO_REPORT: &str = "no report produced";

/// Detail message for an artifact that is not a valid result.
pub const MALFORMED_REPORT: &str = "malformed report";

/// What was found at a verifier's artifact path.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// No file at the path.
    Missing,
    /// The file exists but could not be read or parsed.
    Malformed {
        /// Reader or parser error.
        error: String,
        /// The raw bytes, if they could be read.
        raw: Vec<u8>,
    },
    /// A parsed result.
    Parsed(ProbeResult),
}

/// Reads and parses the artifact at `path`.
pub async fn read_artifact(path: &Path) -> Artifact {
    match tokio::fs::read(path).await {
        Ok(raw) => parse_artifact(raw),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Artifact::Missing,
        Err(e) => Artifact::Malformed {
            error: format!("unreadable: {e}"),
            raw: Vec::new(),
        },
    }
}

/// Parses raw artifact bytes.
#[must_use]
pub fn parse_artifact(raw: Vec<u8>) -> Artifact {
    match serde_json::from_slice::<ProbeResult>(&raw) {
        Ok(result) => Artifact::Parsed(result),
        Err(e) => Artifact::Malformed {
            error: e.to_string(),
            raw,
        },
    }
}

/// The `error` result recorded for a malformed artifact.
///
/// The raw bytes are kept as text, or base64 when they are not UTF-8.
#[must_use]
pub fn malformed_result(
    component: &str,
    error: &str,
    raw: &[u8],
    at: DateTime<Utc>,
) -> ProbeResult {
    let mut detail = json!({
        "message": MALFORMED_REPORT,
        "error": error,
        "failure": FailureKind::AggregationParseError,
    });
    match std::str::from_utf8(raw) {
        Ok(text) => detail["raw"] = Value::String(text.to_string()),
        Err(_) => detail["raw_base64"] = Value::String(STANDARD.encode(raw)),
    }
    ProbeResult::at(component, ProbeStatus::Error, at, detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_artifact() {
        let raw = br#"{"component":"redis","status":"passed","detail":{"keys":12}}"#.to_vec();
        match parse_artifact(raw) {
            Artifact::Parsed(result) => {
                assert_eq!(result.component, "redis");
                assert_eq!(result.status, ProbeStatus::Ok);
            }
            other => panic!("expected parsed artifact, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_status() {
        let raw = br#"{"component":"redis","status":"meh"}"#.to_vec();
        assert!(matches!(parse_artifact(raw), Artifact::Malformed { .. }));
    }

    #[test]
    fn test_malformed_keeps_utf8_text() {
        let result = malformed_result("kafka", "EOF while parsing", b"{\"status\": ", Utc::now());
        assert_eq!(result.status, ProbeStatus::Error);
        assert_eq!(result.message(), Some(MALFORMED_REPORT));
        assert_eq!(result.detail["raw"], json!("{\"status\": "));
        assert_eq!(result.detail["failure"], json!("aggregation_parse_error"));
    }

    #[test]
    fn test_malformed_encodes_binary() {
        let raw = [0xff, 0xfe, 0x00, 0x01];
        let result = malformed_result("kafka", "invalid", &raw, Utc::now());
        assert!(result.detail.get("raw").is_none());
        assert_eq!(result.detail["raw_base64"], json!("//4AAQ=="));
    }

    #[tokio::test]
    async fn test_read_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            read_artifact(&dir.path().join("absent.json")).await,
            Artifact::Missing
        );
    }
}
