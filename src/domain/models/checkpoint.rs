//! Checkpoint records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::flow::FlowSnapshot;
use crate::domain::errors::{DomainError, DomainResult};

/// Durable snapshot of a flow's progress. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flow_id: Uuid,
    /// Strictly increasing per flow, starting at 0 on submission.
    pub sequence: u64,
    /// Opaque resumption payload; the engine stores an encoded [`FlowSnapshot`].
    pub payload: Vec<u8>,
    pub committed_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(flow_id: Uuid, sequence: u64, payload: Vec<u8>) -> Self {
        Self {
            flow_id,
            sequence,
            payload,
            committed_at: Utc::now(),
        }
    }

    pub fn from_snapshot(flow_id: Uuid, sequence: u64, snapshot: &FlowSnapshot) -> DomainResult<Self> {
        Ok(Self::new(flow_id, sequence, snapshot.encode()?))
    }

    pub fn snapshot(&self) -> DomainResult<FlowSnapshot> {
        FlowSnapshot::decode(&self.payload).map_err(|e| {
            DomainError::SerializationError(format!(
                "checkpoint {} of flow {}: {}",
                self.sequence, self.flow_id, e
            ))
        })
    }
}
