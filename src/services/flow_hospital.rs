//! Flow Hospital
//!
//! Receives failures escalated by the flow engine, runs the staff panel and
//! records the verdict. The hospital never touches flow rows; applying the
//! verdict (retry, park, fail) is the engine's job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::condition_registry::{Condition, ConditionRegistry};
use super::observation_hooks::ObservationHooks;
use super::staff::{AdmissionContext, StaffMember, StaffPanel};
use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Diagnosis, Failure, FailureClass, HospitalConfig, ObservationEvent, ObservationKind, Verdict,
};
use crate::domain::ports::DiagnosisRepository;

/// Staff id recorded for operator-imposed verdicts.
pub const OPERATOR: &str = "operator";

pub struct FlowHospital {
    diagnoses: Arc<dyn DiagnosisRepository>,
    conditions: Arc<ConditionRegistry>,
    panel: StaffPanel,
    hooks: ObservationHooks,
    config: HospitalConfig,
    wards: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl FlowHospital {
    pub fn new(diagnoses: Arc<dyn DiagnosisRepository>, config: &HospitalConfig) -> Self {
        let conditions = Arc::new(ConditionRegistry::new());
        Self {
            panel: StaffPanel::with_builtins(conditions.clone(), config.max_resuscitations),
            conditions,
            diagnoses,
            hooks: ObservationHooks::new(),
            config: config.clone(),
            wards: Mutex::new(HashMap::new()),
        }
    }

    /// Classify one escalated failure.
    ///
    /// Fires `Admitted`, evaluates the panel, persists the diagnosis, then
    /// fires `KeptOvernight` for an overnight verdict or `Discharged` otherwise.
    /// Admissions for the same flow are serialized.
    #[instrument(skip(self, failure), fields(kind = %failure.kind))]
    pub async fn admit(&self, flow_id: Uuid, failure: &Failure, checkpoint_sequence: u64) -> DomainResult<Diagnosis> {
        let ward = self.ward(flow_id);
        let result = {
            let _guard = ward.lock().await;
            self.triage(flow_id, failure, checkpoint_sequence).await
        };
        self.release_ward(flow_id, ward);
        result
    }

    async fn triage(&self, flow_id: Uuid, failure: &Failure, checkpoint_sequence: u64) -> DomainResult<Diagnosis> {
        let admission = self.diagnoses.count_for_flow(flow_id).await? + 1;
        warn!(flow_id = %flow_id, admission, sequence = checkpoint_sequence, failure = %failure, "flow admitted");
        self.hooks.fire(&ObservationEvent::new(flow_id, ObservationKind::Admitted, Vec::new()));

        let context = AdmissionContext {
            flow_id,
            admission,
            checkpoint_sequence,
        };
        let decision = self.panel.evaluate(failure, &context);

        let diagnosis = Diagnosis::new(
            flow_id,
            admission,
            checkpoint_sequence,
            decision.consulted,
            decision.verdict,
            decision.classification,
            Some(failure.clone()),
        );
        self.diagnoses.record(&diagnosis).await?;

        match diagnosis.verdict {
            Verdict::Terminal => error!(
                flow_id = %flow_id,
                classification = %diagnosis.classification,
                staff = ?diagnosis.staff_consulted,
                "flow failed terminally"
            ),
            verdict => info!(
                flow_id = %flow_id,
                verdict = %verdict,
                classification = %diagnosis.classification,
                staff = ?diagnosis.staff_consulted,
                "diagnosis recorded"
            ),
        }
        self.fire_outcome(&diagnosis);

        Ok(diagnosis)
    }

    /// Operator override for a flow held overnight.
    ///
    /// `Verdict::Resuscitate` releases the flow for retry, `Verdict::Terminal`
    /// fails it. The diagnosis is attributed to the operator.
    #[instrument(skip(self))]
    pub async fn discharge(&self, flow_id: Uuid, verdict: Verdict, reason: &str) -> DomainResult<Diagnosis> {
        let ward = self.ward(flow_id);
        let result = {
            let _guard = ward.lock().await;
            self.record_operator_verdict(flow_id, verdict, reason).await
        };
        self.release_ward(flow_id, ward);
        result
    }

    async fn record_operator_verdict(&self, flow_id: Uuid, verdict: Verdict, reason: &str) -> DomainResult<Diagnosis> {
        let latest = self.diagnoses.latest_for_flow(flow_id).await?;
        let (admission, checkpoint_sequence) = latest
            .as_ref()
            .map_or((0, 0), |d| (d.admission, d.checkpoint_sequence));
        let failure = latest.and_then(|d| d.failure).map(|mut failure| {
            failure.message = format!("{} (discharged: {reason})", failure.message);
            failure
        });

        let diagnosis = Diagnosis::new(
            flow_id,
            admission,
            checkpoint_sequence,
            vec![OPERATOR.to_string()],
            verdict,
            FailureClass::Operator,
            failure,
        );
        self.diagnoses.record(&diagnosis).await?;
        info!(flow_id = %flow_id, verdict = %verdict, reason, "flow discharged by operator");
        self.fire_outcome(&diagnosis);

        Ok(diagnosis)
    }

    pub fn register_staff(&self, position: usize, member: Arc<dyn StaffMember>) {
        self.panel.register(position, member);
    }

    pub fn register_condition(&self, condition: Condition) {
        self.conditions.register(condition);
    }

    pub fn on_admitted<F>(&self, callback: F)
    where
        F: Fn(Uuid, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_admitted(callback);
    }

    pub fn on_kept_overnight<F>(&self, callback: F)
    where
        F: Fn(Uuid, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_kept_overnight(callback);
    }

    pub fn on_discharged<F>(&self, callback: F)
    where
        F: Fn(Uuid, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_discharged(callback);
    }

    /// Remove custom staff, conditions and hooks.
    pub fn clear_all(&self) {
        self.panel.reset();
        self.conditions.clear();
        self.hooks.clear();
    }

    pub async fn diagnoses(&self, flow_id: Uuid) -> DomainResult<Vec<Diagnosis>> {
        self.diagnoses.list_for_flow(flow_id).await
    }

    pub fn panel(&self) -> &StaffPanel {
        &self.panel
    }

    pub fn conditions(&self) -> &ConditionRegistry {
        &self.conditions
    }

    pub fn hooks(&self) -> &ObservationHooks {
        &self.hooks
    }

    /// Delay schedule between successive resuscitations of one flow.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.config.max_backoff_ms))
            .with_multiplier(self.config.backoff_multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    fn fire_outcome(&self, diagnosis: &Diagnosis) {
        let kind = match diagnosis.verdict {
            Verdict::Overnight => ObservationKind::KeptOvernight,
            Verdict::Resuscitate | Verdict::Terminal => ObservationKind::Discharged,
        };
        self.hooks.fire(&ObservationEvent::new(
            diagnosis.flow_id,
            kind,
            diagnosis.staff_consulted.clone(),
        ));
    }

    fn ward(&self, flow_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.wards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(flow_id)
            .or_default()
            .clone()
    }

    /// Forget the ward unless another admission is queued on it.
    fn release_ward(&self, flow_id: Uuid, ward: Arc<tokio::sync::Mutex<()>>) {
        let mut wards = self.wards.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table, one held here.
        if Arc::strong_count(&ward) == 2 {
            wards.remove(&flow_id);
        }
    }
}
