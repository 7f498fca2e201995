//! Failure payloads escalated to the flow hospital.
//!
//! Staff classify a failure by matching on its tagged [`FailureKind`] and
//! [`FailureOrigin`]; the message is informational only.

use serde::{Deserialize, Serialize};

/// Where inside the engine a failure was raised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum FailureOrigin {
    /// The flow's own step logic.
    Step,
    /// The durable write inside the recording pipeline.
    RecordingWrite,
    /// A state observer notified inside the recording transaction.
    Observer { name: String },
}

impl FailureOrigin {
    /// Whether the failure was raised inside the recording pipeline's scope.
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::RecordingWrite | Self::Observer { .. })
    }
}

/// Persistence-level fault categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceFault {
    ConstraintViolation,
    MalformedData,
    QuerySyntax,
    Other,
}

impl PersistenceFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConstraintViolation => "constraint_violation",
            Self::MalformedData => "malformed_data",
            Self::QuerySyntax => "query_syntax",
            Self::Other => "other",
        }
    }
}

/// Tagged failure kind used for first-match dispatch by staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fault", rename_all = "snake_case")]
pub enum FailureKind {
    /// Infrastructure hiccup, safe to retry from the last checkpoint.
    Transient,
    /// Data-integrity or persistence error.
    Persistence(PersistenceFault),
    InvalidArgument,
    /// Declared unrecoverable by the raiser.
    Fatal,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Persistence(fault) => write!(f, "persistence:{}", fault.as_str()),
            Self::InvalidArgument => f.write_str("invalid_argument"),
            Self::Fatal => f.write_str("fatal"),
            Self::Other => f.write_str("other"),
        }
    }
}

/// A failure escalated from a flow step or the recording pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    #[serde(flatten)]
    pub origin: FailureOrigin,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin: FailureOrigin::Step,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn persistence(fault: PersistenceFault, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Persistence(fault), message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidArgument, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Fatal, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }

    #[must_use]
    pub fn with_origin(mut self, origin: FailureOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self.kind, FailureKind::Persistence(_))
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.origin {
            FailureOrigin::Step => write!(f, "[{}] {}", self.kind, self.message),
            FailureOrigin::RecordingWrite => {
                write!(f, "[{}] recording write: {}", self.kind, self.message)
            }
            FailureOrigin::Observer { name } => {
                write!(f, "[{}] observer {}: {}", self.kind, name, self.message)
            }
        }
    }
}

impl std::error::Error for Failure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_serde_shape() {
        let failure = Failure::persistence(PersistenceFault::ConstraintViolation, "dup key")
            .with_origin(FailureOrigin::Observer {
                name: "ledger".to_string(),
            });
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"]["kind"], "persistence");
        assert_eq!(json["kind"]["fault"], "constraint_violation");
        assert_eq!(json["origin"], "observer");
        assert_eq!(json["name"], "ledger");

        let back: Failure = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
    }

    #[test]
    fn test_recording_origin() {
        assert!(FailureOrigin::RecordingWrite.is_recording());
        assert!(FailureOrigin::Observer { name: "x".into() }.is_recording());
        assert!(!FailureOrigin::Step.is_recording());
    }

    #[test]
    fn test_display_mentions_observer() {
        let failure = Failure::other("boom").with_origin(FailureOrigin::Observer {
            name: "audit".to_string(),
        });
        assert_eq!(failure.to_string(), "[other] observer audit: boom");
    }
}
