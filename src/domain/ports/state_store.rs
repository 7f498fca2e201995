//! Transactional domain state store and observer ports.
//!
//! The recording pipeline opens a [`StateTransaction`], writes, notifies every
//! [`StateObserver`] and only then commits. Failures are reported as
//! [`Failure`] payloads so they can be escalated unchanged.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Failure, RecordedState, StateUpdate};

/// An open write transaction. Dropping it without commit must roll back.
#[async_trait]
pub trait StateTransaction: Send {
    async fn write(&mut self, flow_id: Uuid, states: &[RecordedState]) -> Result<(), Failure>;

    async fn commit(self: Box<Self>) -> Result<(), Failure>;

    async fn rollback(self: Box<Self>) -> Result<(), Failure>;
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StateTransaction>, Failure>;

    /// Committed states recorded by a flow.
    async fn states_for_flow(&self, flow_id: Uuid) -> DomainResult<Vec<RecordedState>>;
}

/// Consumer notified synchronously, inside the recording transaction, of
/// every newly written batch of states.
///
/// Returning `Err` rolls the transaction back and escalates the flow. An
/// observer that handles its own failures internally and returns `Ok` does
/// not affect the flow.
pub trait StateObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_recorded(&self, update: &StateUpdate) -> Result<(), Failure>;
}
