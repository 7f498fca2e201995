//! Flow domain model.
//!
//! A flow is one resumable workflow instance. Its durable progress lives in the
//! checkpoint log; the flow row carries status and the last escalated failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::failure::Failure;

/// Lifecycle status of a flow.
///
/// ```text
/// Running → Running (next step) | AwaitingRecording | Hospitalized | Completed
/// AwaitingRecording → Running | Hospitalized
/// Hospitalized → Discharged | Terminal | Running (restart retry)
/// Discharged → Running | Hospitalized
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    #[default]
    Running,
    /// A step is inside the recording pipeline's transaction.
    AwaitingRecording,
    /// Escalated to the hospital; no checkpoints until discharged.
    Hospitalized,
    /// Released by the hospital, about to resume from its last checkpoint.
    Discharged,
    Completed,
    /// Permanently failed.
    Terminal,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingRecording => "awaiting_recording",
            Self::Hospitalized => "hospitalized",
            Self::Discharged => "discharged",
            Self::Completed => "completed",
            Self::Terminal => "terminal",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "awaiting_recording" => Some(Self::AwaitingRecording),
            "hospitalized" => Some(Self::Hospitalized),
            "discharged" => Some(Self::Discharged),
            "completed" | "complete" => Some(Self::Completed),
            "terminal" => Some(Self::Terminal),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminal)
    }

    /// Whether a checkpoint may be appended for a flow in this status.
    pub fn accepts_checkpoints(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingRecording | Self::Discharged)
    }

    pub fn valid_transitions(&self) -> &'static [FlowStatus] {
        match self {
            Self::Running => &[
                Self::AwaitingRecording,
                Self::Hospitalized,
                Self::Completed,
            ],
            Self::AwaitingRecording => &[Self::Running, Self::Hospitalized],
            Self::Hospitalized => &[Self::Discharged, Self::Terminal, Self::Running],
            Self::Discharged => &[Self::Running, Self::Hospitalized, Self::Terminal],
            Self::Completed | Self::Terminal => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        (*self == next && !self.is_terminal()) || self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted flow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    /// Name of the registered definition driving this flow.
    pub definition: String,
    pub parameters: serde_json::Value,
    pub status: FlowStatus,
    /// Index of the next step to execute.
    pub current_step: usize,
    /// Most recent failure escalated to the hospital.
    pub last_failure: Option<Failure>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(definition: impl Into<String>, parameters: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            definition: definition.into(),
            parameters,
            status: FlowStatus::Running,
            current_step: 0,
            last_failure: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Serializable resumption point stored in a checkpoint payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    /// Next step to run when resuming.
    pub step: usize,
    pub state: serde_json::Value,
}

impl FlowSnapshot {
    pub fn new(step: usize, state: serde_json::Value) -> Self {
        Self { step, state }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hospitalized_flow_rejects_checkpoints() {
        assert!(FlowStatus::Running.accepts_checkpoints());
        assert!(FlowStatus::Discharged.accepts_checkpoints());
        assert!(!FlowStatus::Hospitalized.accepts_checkpoints());
        assert!(!FlowStatus::Completed.accepts_checkpoints());
        assert!(!FlowStatus::Terminal.accepts_checkpoints());
    }

    #[test]
    fn test_status_transitions() {
        assert!(FlowStatus::Running.can_transition_to(FlowStatus::Hospitalized));
        assert!(FlowStatus::Running.can_transition_to(FlowStatus::Running));
        assert!(FlowStatus::Hospitalized.can_transition_to(FlowStatus::Terminal));
        assert!(!FlowStatus::Hospitalized.can_transition_to(FlowStatus::Completed));
        assert!(!FlowStatus::Completed.can_transition_to(FlowStatus::Running));
        assert!(!FlowStatus::Terminal.can_transition_to(FlowStatus::Terminal));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            FlowStatus::Running,
            FlowStatus::AwaitingRecording,
            FlowStatus::Hospitalized,
            FlowStatus::Discharged,
            FlowStatus::Completed,
            FlowStatus::Terminal,
        ] {
            assert_eq!(FlowStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(FlowStatus::from_str("asleep"), None);
    }

    #[test]
    fn test_snapshot_payload_is_json() {
        let snapshot = FlowSnapshot::new(2, serde_json::json!({"count": 3}));
        let payload = snapshot.encode().unwrap();
        assert_eq!(FlowSnapshot::decode(&payload).unwrap(), snapshot);
    }
}
