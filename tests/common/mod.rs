//! Common test utilities for integration tests
//!
//! Builds engines over a shared in-memory pool and provides observers and
//! hook channels used across the hospital and recovery tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

use flow_triage::adapters::sqlite::{
    SqliteCheckpointLog, SqliteDiagnosisRepository, SqliteFlowRepository, SqliteStateStore,
};
use flow_triage::domain::models::{EngineConfig, Failure, HospitalConfig, RecoveryConfig, StateUpdate};
use flow_triage::domain::ports::StateObserver;
use flow_triage::services::{FlowEngine, FlowEngineDeps, FlowHospital, RecordingPipeline};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

/// Hospital settings with millisecond backoff.
pub fn fast_hospital() -> HospitalConfig {
    HospitalConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 10,
        ..HospitalConfig::default()
    }
}

pub fn engine_on(pool: &SqlitePool, hospital: &HospitalConfig, recovery: RecoveryConfig) -> FlowEngine {
    let deps = FlowEngineDeps {
        flows: Arc::new(SqliteFlowRepository::new(pool.clone())),
        checkpoints: Arc::new(SqliteCheckpointLog::new(pool.clone())),
        pipeline: Arc::new(RecordingPipeline::new(Arc::new(SqliteStateStore::new(pool.clone())))),
        hospital: Arc::new(FlowHospital::new(
            Arc::new(SqliteDiagnosisRepository::new(pool.clone())),
            hospital,
        )),
    };
    let config = EngineConfig {
        retain_finished_checkpoints: true,
        ..EngineConfig::default()
    };
    FlowEngine::new(deps, config, recovery)
}

/// Forward every `Admitted` event's flow id into a channel.
pub fn admitted(hospital: &FlowHospital) -> UnboundedReceiver<Uuid> {
    let (tx, rx) = unbounded_channel();
    hospital.on_admitted(move |flow_id, _staff| {
        tx.send(flow_id)?;
        Ok(())
    });
    rx
}

/// Forward every `KeptOvernight` event's flow id into a channel.
pub fn kept_overnight(hospital: &FlowHospital) -> UnboundedReceiver<Uuid> {
    let (tx, rx) = unbounded_channel();
    hospital.on_kept_overnight(move |flow_id, _staff| {
        tx.send(flow_id)?;
        Ok(())
    });
    rx
}

/// Forward every `Discharged` event into a channel.
pub fn discharged(hospital: &FlowHospital) -> UnboundedReceiver<(Uuid, Vec<String>)> {
    let (tx, rx) = unbounded_channel();
    hospital.on_discharged(move |flow_id, staff| {
        tx.send((flow_id, staff.to_vec()))?;
        Ok(())
    });
    rx
}

pub async fn next(rx: &mut UnboundedReceiver<Uuid>) -> Uuid {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for hospital event")
        .expect("hook channel closed")
}

/// Observer that rejects every batch with a fixed failure.
pub struct RejectingObserver {
    failure: Failure,
    pub calls: AtomicUsize,
}

impl RejectingObserver {
    pub fn new(failure: Failure) -> Arc<Self> {
        Arc::new(Self {
            failure,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StateObserver for RejectingObserver {
    fn name(&self) -> &str {
        "rejecting"
    }

    fn on_recorded(&self, _update: &StateUpdate) -> Result<(), Failure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.failure.clone())
    }
}
