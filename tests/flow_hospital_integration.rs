//! Integration tests for the flow hospital driven through the engine.
//!
//! Covers the fail-safe overnight verdict, resuscitation with backoff,
//! terminal failures, custom conditions, operator discharge and teardown.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use common::{discharged, engine_on, fast_hospital, kept_overnight, next, RejectingObserver, WAIT};
use flow_triage::adapters::sqlite::create_migrated_test_pool;
use flow_triage::domain::models::{
    Assessment, Failure, FailureClass, FlowStatus, HospitalConfig, ObservationKind, RecordedState,
    RecoveryConfig, Verdict,
};
use flow_triage::services::{
    AdmissionContext, Condition, Discharge, FlowDefinition, StaffMember, StepContext, StepTransition,
};
use flow_triage::FlowError;

/// Fails with `failure` on the first `failures` attempts, then completes.
struct Flaky {
    name: &'static str,
    failure: Failure,
    failures: usize,
    attempts: AtomicUsize,
}

impl Flaky {
    fn new(name: &'static str, failure: Failure, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            failure,
            failures,
            attempts: AtomicUsize::new(0),
        })
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlowDefinition for Flaky {
    fn name(&self) -> &str {
        self.name
    }

    async fn step(&self, step: usize, _ctx: &mut StepContext, state: Value) -> Result<StepTransition, Failure> {
        if step == 0 {
            return Ok(StepTransition::Next(state));
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(self.failure.clone());
        }
        Ok(StepTransition::Complete(json!({"attempts": attempt + 1})))
    }
}

/// Records one state per run; used to feed observer failures to the panel.
struct Recorder;

#[async_trait]
impl FlowDefinition for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn step(&self, _step: usize, ctx: &mut StepContext, _state: Value) -> Result<StepTransition, Failure> {
        ctx.record_states(vec![RecordedState::new("entry", json!({"amount": -5}))])
            .await
            .map_err(flow_triage::RecordingError::into_failure)?;
        Ok(StepTransition::Complete(json!(null)))
    }
}

struct AlwaysTerminal;

impl StaffMember for AlwaysTerminal {
    fn id(&self) -> &str {
        "always_terminal"
    }

    fn evaluate(&self, _failure: &Failure, _context: &AdmissionContext) -> Assessment {
        Assessment::terminal()
    }
}

#[tokio::test]
async fn test_unclassified_failure_is_kept_overnight() {
    let pool = create_migrated_test_pool().await.unwrap();
    let engine = engine_on(&pool, &fast_hospital(), RecoveryConfig::default());
    let flaky = Flaky::new("odd", Failure::other("something odd"), usize::MAX);
    engine.register(flaky.clone());
    let mut overnight = kept_overnight(engine.hospital());

    let handle = engine.submit("odd", json!({})).await.unwrap();
    assert_eq!(next(&mut overnight).await, handle.flow_id());

    let diagnoses = engine.hospital().diagnoses(handle.flow_id()).await.unwrap();
    assert_eq!(diagnoses.len(), 1);
    assert_eq!(diagnoses[0].verdict, Verdict::Overnight);
    assert_eq!(diagnoses[0].classification, FailureClass::Unclassified);
    assert_eq!(
        diagnoses[0].staff_consulted,
        vec![
            "fatal_failure_specialist",
            "persistence_specialist",
            "transient_failure_specialist",
            "recording_failure_triage"
        ]
    );
    assert_eq!(diagnoses[0].checkpoint_sequence, 1);
    assert_eq!(flaky.attempts(), 1, "the engine never retries on its own");
    assert_eq!(engine.status(handle.flow_id()).await.unwrap(), FlowStatus::Hospitalized);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_transient_failure_is_resuscitated_until_success() {
    let pool = create_migrated_test_pool().await.unwrap();
    let engine = engine_on(&pool, &fast_hospital(), RecoveryConfig::default());
    let flaky = Flaky::new("flaky", Failure::transient("connection reset"), 2);
    engine.register(flaky.clone());
    let mut discharges = discharged(engine.hospital());

    let handle = engine.submit("flaky", json!({})).await.unwrap();
    let output = handle.await_result(WAIT).await.unwrap();

    assert_eq!(output, json!({"attempts": 3}));
    let diagnoses = engine.hospital().diagnoses(handle.flow_id()).await.unwrap();
    assert_eq!(diagnoses.len(), 2);
    assert!(diagnoses.iter().all(|d| d.verdict == Verdict::Resuscitate));
    assert_eq!(diagnoses[1].admission, 2);

    for _ in 0..2 {
        let (flow_id, staff) = discharges.try_recv().unwrap();
        assert_eq!(flow_id, handle.flow_id());
        assert_eq!(staff.last().map(String::as_str), Some("transient_failure_specialist"));
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_transient_failure_beyond_limit_is_kept_overnight() {
    let pool = create_migrated_test_pool().await.unwrap();
    let hospital = HospitalConfig {
        max_resuscitations: 2,
        ..fast_hospital()
    };
    let engine = engine_on(&pool, &hospital, RecoveryConfig::default());
    let flaky = Flaky::new("stubborn", Failure::transient("timeout"), usize::MAX);
    engine.register(flaky.clone());
    let mut overnight = kept_overnight(engine.hospital());

    let handle = engine.submit("stubborn", json!({})).await.unwrap();
    next(&mut overnight).await;

    let verdicts: Vec<Verdict> = engine
        .hospital()
        .diagnoses(handle.flow_id())
        .await
        .unwrap()
        .iter()
        .map(|d| d.verdict)
        .collect();
    assert_eq!(verdicts, vec![Verdict::Resuscitate, Verdict::Resuscitate, Verdict::Overnight]);
    assert_eq!(flaky.attempts(), 3);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_fatal_failure_is_terminal() {
    let pool = create_migrated_test_pool().await.unwrap();
    let engine = engine_on(&pool, &fast_hospital(), RecoveryConfig::default());
    engine.register(Flaky::new("doomed", Failure::fatal("ledger corrupted"), usize::MAX));
    let mut discharges = discharged(engine.hospital());

    let handle = engine.submit("doomed", json!({})).await.unwrap();
    match handle.await_result(WAIT).await.unwrap_err() {
        FlowError::Terminal { diagnosis, .. } => {
            assert_eq!(diagnosis.verdict, Verdict::Terminal);
            assert_eq!(diagnosis.classification, FailureClass::Terminal);
        }
        other => panic!("expected terminal failure, got {other:?}"),
    }
    assert_eq!(handle.status(), FlowStatus::Terminal);
    assert!(discharges.try_recv().is_ok(), "terminal verdicts fire Discharged");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_condition_sees_failure_without_claiming_it() {
    let pool = create_migrated_test_pool().await.unwrap();
    let engine = engine_on(&pool, &fast_hospital(), RecoveryConfig::default());
    engine.register(Arc::new(Recorder));
    engine
        .pipeline()
        .register_observer(RejectingObserver::new(Failure::invalid_argument("amount must be positive")));

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    engine.hospital().register_condition(Condition::new("count-only", move |failure: &Failure| {
        if failure.message.contains("amount") {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        false
    }));
    let mut overnight = kept_overnight(engine.hospital());

    let handle = engine.submit("recorder", json!({})).await.unwrap();
    next(&mut overnight).await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    let err = handle.await_result(Duration::from_millis(50)).await.unwrap_err();
    assert!(err.is_timeout());

    let diagnoses = engine.hospital().diagnoses(handle.flow_id()).await.unwrap();
    assert_eq!(diagnoses[0].classification, FailureClass::Recording);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_matching_condition_classifies_as_data_integrity() {
    let pool = create_migrated_test_pool().await.unwrap();
    let engine = engine_on(&pool, &fast_hospital(), RecoveryConfig::default());
    engine.register(Arc::new(Recorder));
    engine
        .pipeline()
        .register_observer(RejectingObserver::new(Failure::invalid_argument("amount must be positive")));
    engine
        .hospital()
        .register_condition(Condition::new("negative-amount", |f: &Failure| f.message.contains("amount")));
    let mut overnight = kept_overnight(engine.hospital());

    let handle = engine.submit("recorder", json!({})).await.unwrap();
    next(&mut overnight).await;

    let diagnoses = engine.hospital().diagnoses(handle.flow_id()).await.unwrap();
    assert_eq!(diagnoses[0].classification, FailureClass::DataIntegrity);
    assert_eq!(diagnoses[0].staff_consulted.last().map(String::as_str), Some("persistence_specialist"));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_operator_resume_after_overnight() {
    let pool = create_migrated_test_pool().await.unwrap();
    let engine = engine_on(&pool, &fast_hospital(), RecoveryConfig::default());
    let flaky = Flaky::new("held", Failure::other("needs a human"), 1);
    engine.register(flaky.clone());
    let mut overnight = kept_overnight(engine.hospital());

    let handle = engine.submit("held", json!({})).await.unwrap();
    next(&mut overnight).await;

    let diagnosis = engine.discharge(handle.flow_id(), Discharge::Resume).await.unwrap();
    assert_eq!(diagnosis.staff_consulted, vec!["operator"]);
    assert_eq!(diagnosis.classification, FailureClass::Operator);

    assert_eq!(handle.await_result(WAIT).await.unwrap(), json!({"attempts": 2}));
    assert_eq!(flaky.attempts(), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_operator_terminate_after_overnight() {
    let pool = create_migrated_test_pool().await.unwrap();
    let engine = engine_on(&pool, &fast_hospital(), RecoveryConfig::default());
    engine.register(Flaky::new("held", Failure::other("needs a human"), usize::MAX));
    let mut overnight = kept_overnight(engine.hospital());

    let handle = engine.submit("held", json!({})).await.unwrap();
    next(&mut overnight).await;
    engine.discharge(handle.flow_id(), Discharge::Terminate).await.unwrap();

    match handle.await_result(WAIT).await.unwrap_err() {
        FlowError::Terminal { diagnosis, .. } => assert_eq!(diagnosis.staff_consulted, vec!["operator"]),
        other => panic!("expected terminal failure, got {other:?}"),
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_clear_all_restores_default_panel() {
    let pool = create_migrated_test_pool().await.unwrap();
    let engine = engine_on(&pool, &fast_hospital(), RecoveryConfig::default());
    let hospital = engine.hospital();
    hospital.register_staff(0, Arc::new(AlwaysTerminal));
    hospital.register_condition(Condition::new("anything", |_: &Failure| true));
    let _overnight = kept_overnight(hospital);
    hospital.on_admitted(|_, _| Ok(()));

    assert_eq!(hospital.panel().ids().len(), 5);
    hospital.clear_all();

    assert_eq!(hospital.panel().ids().len(), 4);
    assert!(hospital.conditions().is_empty());
    assert_eq!(hospital.hooks().count(ObservationKind::Admitted), 0);
    assert_eq!(hospital.hooks().count(ObservationKind::KeptOvernight), 0);

    let flaky = Flaky::new("after_clear", Failure::transient("blip"), 1);
    engine.register(flaky);
    let handle = engine.submit("after_clear", json!({})).await.unwrap();
    assert_eq!(handle.await_result(WAIT).await.unwrap(), json!({"attempts": 2}));
    engine.shutdown().await;
}
