//! Domain errors for the flow triage system.

use thiserror::Error;
use uuid::Uuid;

use super::models::{Diagnosis, Failure, FlowStatus};

/// Domain-level errors that can occur in the engine, hospital or storage.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Flow not found: {0}")]
    FlowNotFound(Uuid),

    #[error("Flow definition not registered: {0}")]
    DefinitionNotFound(String),

    #[error("Invalid state transition for flow {flow_id} from {from} to {to}")]
    InvalidStateTransition {
        flow_id: Uuid,
        from: FlowStatus,
        to: FlowStatus,
    },

    #[error("Checkpoint conflict for flow {flow_id}: expected sequence {expected}, got {actual}")]
    CheckpointConflict {
        flow_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("Checkpoint rejected for flow {flow_id} while {status}")]
    CheckpointRejected { flow_id: Uuid, status: FlowStatus },

    #[error("No committed checkpoint for flow {0}")]
    NoCheckpoint(Uuid),

    #[error("Flow {0} is already being driven")]
    AlreadyRunning(Uuid),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Engine is shutting down")]
    EngineShutdown,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Failure of the transactional recording step.
///
/// Always escalated to the hospital. Flow code receives a copy, but the step
/// context keeps the original, so discarding it does not avert admission.
#[derive(Debug, Clone, Error)]
#[error("Recording failed for flow {flow_id}: {cause}")]
pub struct RecordingError {
    pub flow_id: Uuid,
    pub cause: Failure,
}

impl RecordingError {
    pub fn new(flow_id: Uuid, cause: Failure) -> Self {
        Self { flow_id, cause }
    }

    pub fn into_failure(self) -> Failure {
        self.cause
    }
}

/// What a caller waiting on a flow can observe besides a result.
#[derive(Debug, Error)]
pub enum FlowError {
    /// No resolution before the deadline. A hospitalized flow surfaces here,
    /// never as its underlying failure.
    #[error("Timed out waiting for flow {flow_id} (status: {status})")]
    Timeout { flow_id: Uuid, status: FlowStatus },

    #[error("Flow {flow_id} failed terminally ({})", .diagnosis.classification)]
    Terminal {
        flow_id: Uuid,
        diagnosis: Box<Diagnosis>,
    },

    #[error(transparent)]
    Engine(#[from] DomainError),
}

impl FlowError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
