//! Outcome model: common result format for execution attempts.
//!
//! This module does not assume any particular executor. It only defines the
//! "shape" of results the scheduler records and acts on.

use serde::{Deserialize, Serialize};

/// A unified classification of an attempt result.
///
/// Serialized as SCREAMING_SNAKE_CASE: SUCCESS / FAILURE / TIMEOUT / CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl OutcomeKind {
    pub fn is_success(self) -> bool {
        self == OutcomeKind::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Success => "SUCCESS",
            OutcomeKind::Failure => "FAILURE",
            OutcomeKind::Timeout => "TIMEOUT",
            OutcomeKind::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(OutcomeKind::Success),
            "FAILURE" => Some(OutcomeKind::Failure),
            "TIMEOUT" => Some(OutcomeKind::Timeout),
            "CANCELLED" => Some(OutcomeKind::Cancelled),
            _ => None,
        }
    }
}

/// What an executor reports back for one attempt.
///
/// - `SUCCESS`: the occurrence is done.
/// - `FAILURE`: recoverable failure, retried per policy.
/// - `TIMEOUT`: the attempt exceeded its time limit (retried like a failure).
/// - `CANCELLED`: cooperative cancellation was honoured (retried like a failure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            detail: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            detail: Some(detail.into()),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Timeout,
            detail: Some(detail.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: OutcomeKind::Cancelled,
            detail: Some("Cancelled".to_string()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_required_names() {
        let s = serde_json::to_string(&OutcomeKind::Success).unwrap();
        assert_eq!(s, "\"SUCCESS\"");

        let s = serde_json::to_string(&OutcomeKind::Timeout).unwrap();
        assert_eq!(s, "\"TIMEOUT\"");

        for kind in [
            OutcomeKind::Success,
            OutcomeKind::Failure,
            OutcomeKind::Timeout,
            OutcomeKind::Cancelled,
        ] {
            assert_eq!(OutcomeKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn cancelled_carries_distinct_detail() {
        let o = Outcome::cancelled();
        assert_eq!(o.kind, OutcomeKind::Cancelled);
        assert_eq!(o.detail.as_deref(), Some("Cancelled"));
        assert!(!o.kind.is_success());
    }

    #[test]
    fn success_omits_detail_in_json() {
        let v = serde_json::to_value(Outcome::success()).unwrap();
        assert!(v.get("detail").is_none());
    }
}
