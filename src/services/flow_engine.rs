//! Checkpointed flow engine.
//!
//! Each flow is driven by its own task, one step at a time. A step returns
//! either the state for the next step, which is committed as a checkpoint
//! before the next step starts, or the flow's output. Any failure, including
//! a recording failure the step tried to swallow, marks the flow Hospitalized
//! and hands it to the [`FlowHospital`]; the engine never retries locally.
//!
//! Steps run at least once. A crash between a step's side effects and its
//! checkpoint re-runs the step on recovery, so step logic must tolerate
//! replays.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{watch, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::flow_hospital::FlowHospital;
use super::recording_pipeline::RecordingPipeline;
use crate::domain::errors::{DomainError, DomainResult, FlowError, RecordingError};
use crate::domain::models::{
    Checkpoint, Diagnosis, EngineConfig, Failure, Flow, FlowSnapshot, FlowStatus, PersistenceFault,
    RecordedState, RecoveryConfig, StateUpdate, Verdict,
};
use crate::domain::ports::{CheckpointLog, FlowRepository};

/// What a step asks the engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StepTransition {
    /// Commit a checkpoint holding this state, then run the next step with it.
    Next(Value),
    /// Finish the flow with this output.
    Complete(Value),
}

/// Business logic of one kind of flow.
#[async_trait]
pub trait FlowDefinition: Send + Sync {
    /// Name flows are submitted under.
    fn name(&self) -> &str;

    /// Run step `step` with the state committed by the previous step
    /// (the submission parameters for step 0).
    async fn step(&self, step: usize, ctx: &mut StepContext, state: Value) -> Result<StepTransition, Failure>;
}

/// Registered flow definitions, by name.
#[derive(Default)]
pub struct FlowRegistry {
    definitions: RwLock<HashMap<String, Arc<dyn FlowDefinition>>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: Arc<dyn FlowDefinition>) {
        self.definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.name().to_string(), definition);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FlowDefinition>> {
        self.definitions.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Handle a step uses to reach the recording pipeline.
///
/// A recording failure is kept by the context. Once the step returns, the
/// engine escalates it whatever the step did with its copy, and any further
/// recording attempt within the same step fails with the same error.
pub struct StepContext {
    flow_id: Uuid,
    step: usize,
    pipeline: Arc<RecordingPipeline>,
    status: Arc<watch::Sender<FlowStatus>>,
    escalation: Option<RecordingError>,
}

impl StepContext {
    fn new(flow_id: Uuid, step: usize, pipeline: Arc<RecordingPipeline>, status: Arc<watch::Sender<FlowStatus>>) -> Self {
        Self {
            flow_id,
            step,
            pipeline,
            status,
            escalation: None,
        }
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub async fn record_states(&mut self, states: Vec<RecordedState>) -> Result<StateUpdate, RecordingError> {
        if let Some(escalation) = &self.escalation {
            return Err(escalation.clone());
        }

        self.status.send_replace(FlowStatus::AwaitingRecording);
        let result = self.pipeline.record_states(self.flow_id, states).await;
        self.status.send_replace(FlowStatus::Running);

        result.map_err(|error| {
            warn!(flow_id = %self.flow_id, step = self.step, cause = %error.cause, "recording failed; flow will be escalated");
            self.escalation = Some(error.clone());
            error
        })
    }

    fn take_escalation(&mut self) -> Option<RecordingError> {
        self.escalation.take()
    }
}

/// Resolution of a flow as seen by its handles.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    Pending,
    Completed(Value),
    Failed(Box<Diagnosis>),
}

/// Caller-side view of a submitted flow.
#[derive(Debug, Clone)]
pub struct FlowHandle {
    flow_id: Uuid,
    status: watch::Receiver<FlowStatus>,
    outcome: watch::Receiver<FlowOutcome>,
}

impl FlowHandle {
    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn status(&self) -> FlowStatus {
        *self.status.borrow()
    }

    /// Wait until the flow completes or fails terminally.
    ///
    /// A flow that is still running or held in the hospital when `timeout`
    /// elapses yields [`FlowError::Timeout`], never its underlying failure.
    pub async fn await_result(&self, timeout: Duration) -> Result<Value, FlowError> {
        let mut outcome = self.outcome.clone();
        let resolved = tokio::time::timeout(timeout, async move {
            outcome
                .wait_for(|o| !matches!(o, FlowOutcome::Pending))
                .await
                .map(|o| o.clone())
        })
        .await;

        match resolved {
            Ok(Ok(outcome)) => self.resolve(outcome),
            Ok(Err(_)) => Err(FlowError::Engine(DomainError::EngineShutdown)),
            Err(_) => Err(FlowError::Timeout {
                flow_id: self.flow_id,
                status: self.status(),
            }),
        }
    }

    /// Invoke `callback` once the flow resolves. Never called for a flow that
    /// stays hospitalized.
    pub fn subscribe_completion<F>(&self, callback: F)
    where
        F: FnOnce(Result<Value, FlowError>) + Send + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut outcome = handle.outcome.clone();
            let resolved = outcome
                .wait_for(|o| !matches!(o, FlowOutcome::Pending))
                .await
                .map(|o| o.clone());
            if let Ok(outcome) = resolved {
                callback(handle.resolve(outcome));
            }
        });
    }

    fn resolve(&self, outcome: FlowOutcome) -> Result<Value, FlowError> {
        match outcome {
            FlowOutcome::Completed(value) => Ok(value),
            FlowOutcome::Failed(diagnosis) => Err(FlowError::Terminal {
                flow_id: self.flow_id,
                diagnosis,
            }),
            FlowOutcome::Pending => Err(FlowError::Timeout {
                flow_id: self.flow_id,
                status: self.status(),
            }),
        }
    }
}

/// Operator decision for a hospitalized flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discharge {
    /// Resume from the last committed checkpoint.
    Resume,
    /// Fail the flow permanently.
    Terminate,
}

/// Flows picked up by [`FlowEngine::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Running or discharged flows resumed from their last checkpoint.
    pub resumed: Vec<Uuid>,
    /// Hospitalized flows re-executed from their last checkpoint.
    pub retried: Vec<Uuid>,
    /// Hospitalized flows whose failure was re-admitted without re-execution.
    pub readmitted: Vec<Uuid>,
    /// Flows whose definition is not registered, or already driven here.
    pub skipped: Vec<Uuid>,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.resumed.len() + self.retried.len() + self.readmitted.len()
    }
}

/// Storage and collaborators the engine drives flows through.
#[derive(Clone)]
pub struct FlowEngineDeps {
    pub flows: Arc<dyn FlowRepository>,
    pub checkpoints: Arc<dyn CheckpointLog>,
    pub pipeline: Arc<RecordingPipeline>,
    pub hospital: Arc<FlowHospital>,
}

/// In-process state of a flow known to this engine.
#[derive(Clone)]
struct LiveFlow {
    status: Arc<watch::Sender<FlowStatus>>,
    outcome: Arc<watch::Sender<FlowOutcome>>,
    /// Held by whichever task is driving the flow.
    helm: Arc<tokio::sync::Mutex<()>>,
}

impl LiveFlow {
    fn new(status: FlowStatus, outcome: FlowOutcome) -> Self {
        Self {
            status: Arc::new(watch::channel(status).0),
            outcome: Arc::new(watch::channel(outcome).0),
            helm: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn handle(&self, flow_id: Uuid) -> FlowHandle {
        FlowHandle {
            flow_id,
            status: self.status.subscribe(),
            outcome: self.outcome.subscribe(),
        }
    }
}

/// Where a driver starts: the snapshot to run and the next checkpoint sequence.
struct ResumePoint {
    snapshot: FlowSnapshot,
    next_sequence: u64,
}

impl ResumePoint {
    fn committed_sequence(&self) -> u64 {
        self.next_sequence.saturating_sub(1)
    }
}

struct EngineInner {
    deps: FlowEngineDeps,
    config: EngineConfig,
    recovery: RecoveryConfig,
    definitions: FlowRegistry,
    live: Mutex<HashMap<Uuid, LiveFlow>>,
    workers: Arc<Semaphore>,
    drivers: Mutex<JoinSet<()>>,
    shutting_down: AtomicBool,
}

#[derive(Clone)]
pub struct FlowEngine {
    inner: Arc<EngineInner>,
}

impl FlowEngine {
    pub fn new(deps: FlowEngineDeps, config: EngineConfig, recovery: RecoveryConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            inner: Arc::new(EngineInner {
                deps,
                config,
                recovery,
                definitions: FlowRegistry::new(),
                live: Mutex::new(HashMap::new()),
                workers,
                drivers: Mutex::new(JoinSet::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn register(&self, definition: Arc<dyn FlowDefinition>) {
        info!(definition = %definition.name(), "registering flow definition");
        self.inner.definitions.register(definition);
    }

    pub fn definitions(&self) -> &FlowRegistry {
        &self.inner.definitions
    }

    pub fn hospital(&self) -> &Arc<FlowHospital> {
        &self.inner.deps.hospital
    }

    pub fn pipeline(&self) -> &Arc<RecordingPipeline> {
        &self.inner.deps.pipeline
    }

    /// Create a flow, commit checkpoint 0 and start driving it. Returns as
    /// soon as the flow is durable.
    #[instrument(skip(self, parameters))]
    pub async fn submit(&self, definition: &str, parameters: Value) -> DomainResult<FlowHandle> {
        self.ensure_accepting()?;
        let flow_definition = self
            .inner
            .definitions
            .get(definition)
            .ok_or_else(|| DomainError::DefinitionNotFound(definition.to_string()))?;

        let flow = Flow::new(definition, parameters);
        self.inner.deps.flows.create(&flow).await?;
        let snapshot = FlowSnapshot::new(0, flow.parameters.clone());
        self.inner
            .deps
            .checkpoints
            .append(&Checkpoint::from_snapshot(flow.id, 0, &snapshot)?, 0)
            .await?;

        let live = LiveFlow::new(FlowStatus::Running, FlowOutcome::Pending);
        let helm = live.helm.clone().try_lock_owned().map_err(|_| DomainError::AlreadyRunning(flow.id))?;
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flow.id, live.clone());

        info!(flow_id = %flow.id, definition, "flow submitted");
        self.spawn_driver(
            helm,
            flow.id,
            flow_definition,
            ResumePoint {
                snapshot,
                next_sequence: 1,
            },
            None,
        );

        Ok(live.handle(flow.id))
    }

    /// Reload every unfinished flow and drive it from its last checkpoint.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> DomainResult<RecoveryReport> {
        self.ensure_accepting()?;
        let mut report = RecoveryReport::default();
        let flows = self
            .inner
            .deps
            .flows
            .list_by_status(&[
                FlowStatus::Running,
                FlowStatus::AwaitingRecording,
                FlowStatus::Discharged,
                FlowStatus::Hospitalized,
            ])
            .await?;

        for flow in flows {
            let Some(definition) = self.inner.definitions.get(&flow.definition) else {
                warn!(flow_id = %flow.id, definition = %flow.definition, "no definition registered; flow left as is");
                report.skipped.push(flow.id);
                continue;
            };

            let live = self.live_flow(flow.id, flow.status);
            let Ok(helm) = live.helm.clone().try_lock_owned() else {
                report.skipped.push(flow.id);
                continue;
            };

            let pending = match flow.status {
                FlowStatus::Hospitalized if !self.inner.recovery.retry_hospitalized => {
                    report.readmitted.push(flow.id);
                    Some(flow.last_failure.clone().unwrap_or_else(|| {
                        Failure::other("flow was hospitalized before restart")
                    }))
                }
                FlowStatus::Hospitalized => {
                    self.inner.transition(flow.id, FlowStatus::Running, |_| {}).await?;
                    report.retried.push(flow.id);
                    None
                }
                _ => {
                    self.inner.transition(flow.id, FlowStatus::Running, |_| {}).await?;
                    report.resumed.push(flow.id);
                    None
                }
            };

            let resume = self.inner.resume_point(&flow).await?;
            debug!(flow_id = %flow.id, step = resume.snapshot.step, sequence = resume.committed_sequence(), "recovering flow");
            self.spawn_driver(helm, flow.id, definition, resume, pending);
        }

        info!(
            resumed = report.resumed.len(),
            retried = report.retried.len(),
            readmitted = report.readmitted.len(),
            skipped = report.skipped.len(),
            "recovery complete"
        );
        Ok(report)
    }

    /// Handle for any known flow, including finished ones.
    ///
    /// Finished flows are answered from storage and never re-enter the live
    /// table.
    pub async fn handle(&self, flow_id: Uuid) -> DomainResult<FlowHandle> {
        if let Some(live) = self.inner.live.lock().unwrap_or_else(PoisonError::into_inner).get(&flow_id) {
            return Ok(live.handle(flow_id));
        }

        let flow = self.inner.load(flow_id).await?;
        let finished = match flow.status {
            FlowStatus::Completed => Some(FlowOutcome::Completed(flow.result.clone().unwrap_or(Value::Null))),
            FlowStatus::Terminal => self
                .inner
                .deps
                .hospital
                .diagnoses(flow_id)
                .await?
                .pop()
                .map(|diagnosis| FlowOutcome::Failed(Box::new(diagnosis))),
            _ => None,
        };
        if let Some(outcome) = finished {
            return Ok(LiveFlow::new(flow.status, outcome).handle(flow_id));
        }
        Ok(self.live_flow(flow_id, flow.status).handle(flow_id))
    }

    pub async fn status(&self, flow_id: Uuid) -> DomainResult<FlowStatus> {
        if let Some(live) = self.inner.live.lock().unwrap_or_else(PoisonError::into_inner).get(&flow_id) {
            return Ok(*live.status.borrow());
        }
        Ok(self.inner.load(flow_id).await?.status)
    }

    /// Operator override for a hospitalized flow.
    #[instrument(skip(self))]
    pub async fn discharge(&self, flow_id: Uuid, discharge: Discharge) -> DomainResult<Diagnosis> {
        self.ensure_accepting()?;
        let flow = self.inner.load(flow_id).await?;
        let definition = self
            .inner
            .definitions
            .get(&flow.definition)
            .ok_or_else(|| DomainError::DefinitionNotFound(flow.definition.clone()))?;

        let target = match discharge {
            Discharge::Resume => FlowStatus::Discharged,
            Discharge::Terminate => FlowStatus::Terminal,
        };
        let require_hospitalized = |flow: &Flow| {
            if flow.status == FlowStatus::Hospitalized {
                Ok(())
            } else {
                Err(DomainError::InvalidStateTransition {
                    flow_id,
                    from: flow.status,
                    to: target,
                })
            }
        };
        require_hospitalized(&flow)?;

        let live = self.live_flow(flow_id, flow.status);
        // Waits for a driver that is still finishing the admission.
        let helm = live.helm.clone().lock_owned().await;

        let flow = self.inner.load(flow_id).await?;
        require_hospitalized(&flow)?;

        match discharge {
            Discharge::Resume => {
                let diagnosis = self
                    .inner
                    .deps
                    .hospital
                    .discharge(flow_id, Verdict::Resuscitate, "operator resume")
                    .await?;
                self.inner.transition(flow_id, FlowStatus::Discharged, |_| {}).await?;
                self.inner.transition(flow_id, FlowStatus::Running, |_| {}).await?;
                let resume = self.inner.resume_point(&flow).await?;
                self.spawn_driver(helm, flow_id, definition, resume, None);
                Ok(diagnosis)
            }
            Discharge::Terminate => {
                let diagnosis = self
                    .inner
                    .deps
                    .hospital
                    .discharge(flow_id, Verdict::Terminal, "operator terminate")
                    .await?;
                self.inner.finish_terminal(flow_id, &diagnosis).await?;
                Ok(diagnosis)
            }
        }
    }

    /// Stop accepting work and abort every driver. Flows keep their persisted
    /// status and resume on the next [`FlowEngine::recover`].
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.workers.close();

        let mut drivers = std::mem::take(&mut *self.inner.drivers.lock().unwrap_or_else(PoisonError::into_inner));
        drivers.abort_all();
        while drivers.join_next().await.is_some() {}
        info!("flow engine shut down");
    }

    fn ensure_accepting(&self) -> DomainResult<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(DomainError::EngineShutdown);
        }
        Ok(())
    }

    fn live_flow(&self, flow_id: Uuid, status: FlowStatus) -> LiveFlow {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(flow_id)
            .or_insert_with(|| LiveFlow::new(status, FlowOutcome::Pending))
            .clone()
    }

    fn spawn_driver(
        &self,
        helm: OwnedMutexGuard<()>,
        flow_id: Uuid,
        definition: Arc<dyn FlowDefinition>,
        resume: ResumePoint,
        pending: Option<Failure>,
    ) {
        let inner = self.inner.clone();
        let mut drivers = self.inner.drivers.lock().unwrap_or_else(PoisonError::into_inner);
        while drivers.try_join_next().is_some() {}
        drivers.spawn(async move {
            let _helm = helm;
            if let Err(e) = inner.drive(flow_id, definition, resume, pending).await {
                error!(flow_id = %flow_id, error = %e, "flow driver stopped");
            }
        });
    }
}

impl EngineInner {
    async fn drive(
        &self,
        flow_id: Uuid,
        definition: Arc<dyn FlowDefinition>,
        mut resume: ResumePoint,
        mut pending: Option<Failure>,
    ) -> DomainResult<()> {
        let live = self.live(flow_id)?;
        let mut backoff = self.deps.hospital.backoff();

        loop {
            let outcome = match pending.take() {
                Some(failure) => Err(failure),
                None => {
                    let Ok(permit) = self.workers.clone().acquire_owned().await else {
                        return Ok(());
                    };
                    let step = resume.snapshot.step;
                    let mut ctx = StepContext::new(flow_id, step, self.deps.pipeline.clone(), live.status.clone());
                    let result = AssertUnwindSafe(definition.step(step, &mut ctx, resume.snapshot.state.clone()))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(Failure::other(format!("step {step} panicked"))));
                    drop(permit);

                    match ctx.take_escalation() {
                        Some(escalation) => Err(escalation.into_failure()),
                        None => result,
                    }
                }
            };

            match outcome {
                Ok(StepTransition::Next(state)) => {
                    let snapshot = FlowSnapshot::new(resume.snapshot.step + 1, state);
                    let checkpoint = Checkpoint::from_snapshot(flow_id, resume.next_sequence, &snapshot)?;
                    if let Err(e) = self.deps.checkpoints.append(&checkpoint, snapshot.step).await {
                        warn!(flow_id = %flow_id, sequence = resume.next_sequence, error = %e, "checkpoint commit failed");
                        pending = Some(Failure::persistence(
                            PersistenceFault::Other,
                            format!("checkpoint commit failed: {e}"),
                        ));
                        continue;
                    }
                    debug!(flow_id = %flow_id, sequence = resume.next_sequence, step = snapshot.step, "checkpoint committed");
                    resume = ResumePoint {
                        snapshot,
                        next_sequence: resume.next_sequence + 1,
                    };
                }
                Ok(StepTransition::Complete(output)) => {
                    self.transition(flow_id, FlowStatus::Completed, |flow| flow.result = Some(output.clone()))
                        .await?;
                    self.purge_if_finished(flow_id).await?;
                    self.retire(flow_id);
                    live.outcome.send_replace(FlowOutcome::Completed(output));
                    info!(flow_id = %flow_id, "flow completed");
                    return Ok(());
                }
                Err(failure) => {
                    let diagnosis = self.escalate(flow_id, &failure, resume.committed_sequence()).await?;
                    match diagnosis.verdict {
                        Verdict::Resuscitate => {
                            self.transition(flow_id, FlowStatus::Discharged, |_| {}).await?;
                            let delay = backoff.next_backoff().unwrap_or_default();
                            debug!(flow_id = %flow_id, delay_ms = delay.as_millis() as u64, "resuscitating flow");
                            tokio::time::sleep(delay).await;
                            let flow = self.transition(flow_id, FlowStatus::Running, |_| {}).await?;
                            resume = self.resume_point(&flow).await?;
                        }
                        Verdict::Overnight => return Ok(()),
                        Verdict::Terminal => {
                            self.finish_terminal(flow_id, &diagnosis).await?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Mark the flow Hospitalized, then admit it.
    async fn escalate(&self, flow_id: Uuid, failure: &Failure, checkpoint_sequence: u64) -> DomainResult<Diagnosis> {
        warn!(flow_id = %flow_id, sequence = checkpoint_sequence, failure = %failure, "escalating flow to hospital");
        let stored = failure.clone();
        self.transition(flow_id, FlowStatus::Hospitalized, move |flow| flow.last_failure = Some(stored))
            .await?;
        self.deps.hospital.admit(flow_id, failure, checkpoint_sequence).await
    }

    async fn finish_terminal(&self, flow_id: Uuid, diagnosis: &Diagnosis) -> DomainResult<()> {
        self.transition(flow_id, FlowStatus::Terminal, |_| {}).await?;
        self.purge_if_finished(flow_id).await?;
        if let Some(live) = self.retire(flow_id) {
            live.outcome.send_replace(FlowOutcome::Failed(Box::new(diagnosis.clone())));
        }
        Ok(())
    }

    /// Drop a finished flow from the live table. Handles already issued keep
    /// their channels and still see the final outcome.
    fn retire(&self, flow_id: Uuid) -> Option<LiveFlow> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).remove(&flow_id)
    }

    async fn purge_if_finished(&self, flow_id: Uuid) -> DomainResult<()> {
        if !self.config.retain_finished_checkpoints {
            let removed = self.deps.checkpoints.purge(flow_id).await?;
            debug!(flow_id = %flow_id, removed, "purged checkpoints");
        }
        Ok(())
    }

    /// Highest committed checkpoint, or step 0 with the submission parameters
    /// if none survived.
    async fn resume_point(&self, flow: &Flow) -> DomainResult<ResumePoint> {
        match self.deps.checkpoints.latest(flow.id).await? {
            Some(checkpoint) => Ok(ResumePoint {
                snapshot: checkpoint.snapshot()?,
                next_sequence: checkpoint.sequence + 1,
            }),
            None => Ok(ResumePoint {
                snapshot: FlowSnapshot::new(0, flow.parameters.clone()),
                next_sequence: 0,
            }),
        }
    }

    async fn transition<F>(&self, flow_id: Uuid, to: FlowStatus, apply: F) -> DomainResult<Flow>
    where
        F: FnOnce(&mut Flow) + Send,
    {
        let mut flow = self.load(flow_id).await?;
        if !flow.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                flow_id,
                from: flow.status,
                to,
            });
        }

        flow.status = to;
        apply(&mut flow);
        flow.updated_at = Utc::now();
        self.deps.flows.update(&flow).await?;

        if let Ok(live) = self.live(flow_id) {
            live.status.send_replace(to);
        }
        Ok(flow)
    }

    async fn load(&self, flow_id: Uuid) -> DomainResult<Flow> {
        self.deps.flows.get(flow_id).await?.ok_or(DomainError::FlowNotFound(flow_id))
    }

    fn live(&self, flow_id: Uuid) -> DomainResult<LiveFlow> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&flow_id)
            .cloned()
            .ok_or(DomainError::FlowNotFound(flow_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteCheckpointLog, SqliteDiagnosisRepository, SqliteFlowRepository,
        SqliteStateStore,
    };
    use crate::domain::models::HospitalConfig;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(5);

    struct Countdown;

    #[async_trait]
    impl FlowDefinition for Countdown {
        fn name(&self) -> &str {
            "countdown"
        }

        async fn step(&self, _step: usize, ctx: &mut StepContext, state: Value) -> Result<StepTransition, Failure> {
            let remaining = state["remaining"].as_u64().unwrap_or(0);
            if remaining == 0 {
                return Ok(StepTransition::Complete(json!({"done": ctx.step()})));
            }
            ctx.record_states(vec![RecordedState::new("tick", json!({"remaining": remaining}))])
                .await
                .map_err(RecordingError::into_failure)?;
            Ok(StepTransition::Next(json!({"remaining": remaining - 1})))
        }
    }

    struct Explodes;

    #[async_trait]
    impl FlowDefinition for Explodes {
        fn name(&self) -> &str {
            "explodes"
        }

        async fn step(&self, _step: usize, _ctx: &mut StepContext, _state: Value) -> Result<StepTransition, Failure> {
            Err(Failure::fatal("ledger corrupted"))
        }
    }

    /// Commits one checkpoint, then never finishes step 1.
    struct Stalls;

    #[async_trait]
    impl FlowDefinition for Stalls {
        fn name(&self) -> &str {
            "stalls"
        }

        async fn step(&self, step: usize, _ctx: &mut StepContext, state: Value) -> Result<StepTransition, Failure> {
            if step == 0 {
                return Ok(StepTransition::Next(state));
            }
            std::future::pending::<()>().await;
            Ok(StepTransition::Complete(state))
        }
    }

    fn live_count(engine: &FlowEngine) -> usize {
        engine.inner.live.lock().unwrap().len()
    }

    async fn engine(retain: bool) -> (FlowEngine, Arc<SqliteCheckpointLog>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let checkpoints = Arc::new(SqliteCheckpointLog::new(pool.clone()));
        let deps = FlowEngineDeps {
            flows: Arc::new(SqliteFlowRepository::new(pool.clone())),
            checkpoints: checkpoints.clone(),
            pipeline: Arc::new(RecordingPipeline::new(Arc::new(SqliteStateStore::new(pool.clone())))),
            hospital: Arc::new(FlowHospital::new(
                Arc::new(SqliteDiagnosisRepository::new(pool)),
                &HospitalConfig::default(),
            )),
        };
        let config = EngineConfig {
            retain_finished_checkpoints: retain,
            ..EngineConfig::default()
        };
        let engine = FlowEngine::new(deps, config, RecoveryConfig::default());
        engine.register(Arc::new(Countdown));
        engine.register(Arc::new(Explodes));
        engine.register(Arc::new(Stalls));
        (engine, checkpoints)
    }

    #[tokio::test]
    async fn test_flow_runs_to_completion_with_checkpoints() {
        let (engine, checkpoints) = engine(true).await;
        let handle = engine.submit("countdown", json!({"remaining": 3})).await.unwrap();

        let output = handle.await_result(WAIT).await.unwrap();
        assert_eq!(output, json!({"done": 3}));
        assert_eq!(handle.status(), FlowStatus::Completed);

        let sequences: Vec<u64> = checkpoints
            .list(handle.flow_id())
            .await
            .unwrap()
            .iter()
            .map(|c| c.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_finished_flow_checkpoints_are_purged() {
        let (engine, checkpoints) = engine(false).await;
        let handle = engine.submit("countdown", json!({"remaining": 1})).await.unwrap();
        handle.await_result(WAIT).await.unwrap();

        assert!(checkpoints.list(handle.flow_id()).await.unwrap().is_empty());
        assert_eq!(engine.status(handle.flow_id()).await.unwrap(), FlowStatus::Completed);
    }

    #[tokio::test]
    async fn test_fatal_step_failure_is_terminal() {
        let (engine, _) = engine(false).await;
        let handle = engine.submit("explodes", json!(null)).await.unwrap();

        let err = handle.await_result(WAIT).await.unwrap_err();
        match err {
            FlowError::Terminal { diagnosis, .. } => {
                assert_eq!(diagnosis.verdict, Verdict::Terminal);
                assert_eq!(diagnosis.staff_consulted, vec!["fatal_failure_specialist"]);
            }
            other => panic!("expected terminal failure, got {other:?}"),
        }
        assert_eq!(handle.status(), FlowStatus::Terminal);
    }

    #[tokio::test]
    async fn test_unknown_definition() {
        let (engine, _) = engine(false).await;
        let err = engine.submit("missing", json!(null)).await.unwrap_err();
        assert!(matches!(err, DomainError::DefinitionNotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_handle_for_finished_flow() {
        let (engine, _) = engine(false).await;
        let handle = engine.submit("countdown", json!({"remaining": 0})).await.unwrap();
        handle.await_result(WAIT).await.unwrap();

        let again = engine.handle(handle.flow_id()).await.unwrap();
        assert_eq!(again.await_result(WAIT).await.unwrap(), json!({"done": 0}));
    }

    #[tokio::test]
    async fn test_discharge_requires_hospitalized_flow() {
        let (engine, _) = engine(false).await;
        let handle = engine.submit("countdown", json!({"remaining": 0})).await.unwrap();
        handle.await_result(WAIT).await.unwrap();

        let err = engine.discharge(handle.flow_id(), Discharge::Resume).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidStateTransition { from: FlowStatus::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn test_discharge_of_running_flow_fails_fast() {
        let (engine, checkpoints) = engine(true).await;
        let handle = engine.submit("stalls", json!({})).await.unwrap();

        for _ in 0..500 {
            if checkpoints.list(handle.flow_id()).await.unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(checkpoints.list(handle.flow_id()).await.unwrap().len(), 2, "step 1 never started");

        let err = tokio::time::timeout(WAIT, engine.discharge(handle.flow_id(), Discharge::Resume))
            .await
            .expect("discharge must not wait on a running driver")
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidStateTransition {
                from: FlowStatus::Running,
                to: FlowStatus::Discharged,
                ..
            }
        ));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_finished_flows_leave_live_table() {
        let (engine, _) = engine(false).await;
        let completed = engine.submit("countdown", json!({"remaining": 1})).await.unwrap();
        let failed = engine.submit("explodes", json!(null)).await.unwrap();

        completed.await_result(WAIT).await.unwrap();
        assert!(failed.await_result(WAIT).await.is_err());
        assert_eq!(live_count(&engine), 0);

        let again = engine.handle(completed.flow_id()).await.unwrap();
        assert_eq!(again.await_result(WAIT).await.unwrap(), json!({"done": 1}));
        let again = engine.handle(failed.flow_id()).await.unwrap();
        assert!(matches!(again.await_result(WAIT).await, Err(FlowError::Terminal { .. })));
        assert_eq!(live_count(&engine), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let (engine, _) = engine(false).await;
        engine.shutdown().await;
        assert!(matches!(
            engine.submit("countdown", json!({})).await.unwrap_err(),
            DomainError::EngineShutdown
        ));
    }
}
