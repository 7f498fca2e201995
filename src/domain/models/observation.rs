//! Observation events emitted by the flow hospital.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Admitted,
    KeptOvernight,
    Discharged,
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admitted => f.write_str("admitted"),
            Self::KeptOvernight => f.write_str("kept_overnight"),
            Self::Discharged => f.write_str("discharged"),
        }
    }
}

/// Record of a hospital transition, handed to every hook of its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationEvent {
    pub flow_id: Uuid,
    pub kind: ObservationKind,
    /// Staff consulted so far; empty on admission.
    pub staff: Vec<String>,
}

impl ObservationEvent {
    pub fn new(flow_id: Uuid, kind: ObservationKind, staff: Vec<String>) -> Self {
        Self {
            flow_id,
            kind,
            staff,
        }
    }
}
