//! Flow repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Flow, FlowStatus};

/// Repository interface for flow rows.
#[async_trait]
pub trait FlowRepository: Send + Sync {
    /// Insert a new flow.
    async fn create(&self, flow: &Flow) -> DomainResult<()>;

    /// Get a flow by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Flow>>;

    /// Persist status, step pointer, failure and result of an existing flow.
    async fn update(&self, flow: &Flow) -> DomainResult<()>;

    /// Flows in any of the given statuses, oldest first.
    async fn list_by_status(&self, statuses: &[FlowStatus]) -> DomainResult<Vec<Flow>>;

    /// Most recently updated flows.
    async fn list(&self, limit: usize) -> DomainResult<Vec<Flow>>;
}
