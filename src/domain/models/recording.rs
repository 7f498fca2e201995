//! Domain states written by the recording pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One domain state a flow step wants recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedState {
    pub id: Uuid,
    /// Free-form state type, e.g. `"invoice"`. Must not be empty.
    pub kind: String,
    pub payload: serde_json::Value,
}

impl RecordedState {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
        }
    }
}

/// The batch of states written in one recording transaction, as observers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub flow_id: Uuid,
    pub states: Vec<RecordedState>,
    pub recorded_at: DateTime<Utc>,
}

impl StateUpdate {
    pub fn new(flow_id: Uuid, states: Vec<RecordedState>) -> Self {
        Self {
            flow_id,
            states,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
