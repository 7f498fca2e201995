//! Checkpoint log port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Checkpoint;

/// Append-only durable store of flow snapshots.
///
/// Implementations must reject an append whose sequence is not exactly one
/// past the highest committed sequence (`CheckpointConflict`), and any append
/// for a flow whose status does not accept checkpoints (`CheckpointRejected`).
#[async_trait]
pub trait CheckpointLog: Send + Sync {
    /// Append a checkpoint and move the flow's step pointer to `next_step`
    /// in the same transaction.
    async fn append(&self, checkpoint: &Checkpoint, next_step: usize) -> DomainResult<()>;

    /// Highest committed checkpoint for a flow.
    async fn latest(&self, flow_id: Uuid) -> DomainResult<Option<Checkpoint>>;

    /// All checkpoints for a flow, ascending by sequence.
    async fn list(&self, flow_id: Uuid) -> DomainResult<Vec<Checkpoint>>;

    /// Remove every checkpoint of a finished flow. Returns the number removed.
    async fn purge(&self, flow_id: Uuid) -> DomainResult<u64>;
}
