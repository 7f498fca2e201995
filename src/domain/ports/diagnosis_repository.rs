//! Diagnosis repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Diagnosis;

#[async_trait]
pub trait DiagnosisRepository: Send + Sync {
    async fn record(&self, diagnosis: &Diagnosis) -> DomainResult<()>;

    /// Diagnoses for a flow, oldest first.
    async fn list_for_flow(&self, flow_id: Uuid) -> DomainResult<Vec<Diagnosis>>;

    async fn latest_for_flow(&self, flow_id: Uuid) -> DomainResult<Option<Diagnosis>>;

    /// Number of admissions recorded for a flow.
    async fn count_for_flow(&self, flow_id: Uuid) -> DomainResult<u32>;
}
