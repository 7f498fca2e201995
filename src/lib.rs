//! Flow Triage - checkpointed flows with a staffed failure hospital
//!
//! A flow is a multi-step, checkpointed unit of work. Domain state produced by
//! a step goes through the recording pipeline, which commits it together with
//! every registered observer or not at all. Failures escalate to the flow
//! hospital, whose staff panel decides whether the flow is retried, held for
//! an operator, or failed for good.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and storage ports
//! - **Adapters** (`adapters`): SQLite implementations of the ports
//! - **Service Layer** (`services`): flow engine, recording pipeline, hospital
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): operator command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use flow_triage::adapters::sqlite::*;
//! use flow_triage::services::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = flow_triage::ConfigLoader::load()?;
//!     let pool = initialize_database(&config.database.url(), None).await?;
//!     let deps = FlowEngineDeps {
//!         flows: Arc::new(SqliteFlowRepository::new(pool.clone())),
//!         checkpoints: Arc::new(SqliteCheckpointLog::new(pool.clone())),
//!         pipeline: Arc::new(RecordingPipeline::new(Arc::new(SqliteStateStore::new(pool.clone())))),
//!         hospital: Arc::new(FlowHospital::new(
//!             Arc::new(SqliteDiagnosisRepository::new(pool)),
//!             &config.hospital,
//!         )),
//!     };
//!     let engine = FlowEngine::new(deps, config.engine, config.recovery);
//!     engine.register(Arc::new(MyTransfer));
//!     engine.recover().await?;
//!     let handle = engine.submit("transfer", serde_json::json!({"amount": 10})).await?;
//!     handle.await_result(std::time::Duration::from_secs(30)).await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult, FlowError, RecordingError};
pub use domain::models::{
    Checkpoint, Config, Diagnosis, Failure, FailureClass, FailureKind, FailureOrigin, Flow,
    FlowStatus, PersistenceFault, RecordedState, StateUpdate, Verdict,
};
pub use domain::ports::{CheckpointLog, DiagnosisRepository, FlowRepository, StateObserver, StateStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    Condition, Discharge, FlowDefinition, FlowEngine, FlowEngineDeps, FlowHandle, FlowHospital,
    RecordingPipeline, StaffMember, StepContext, StepTransition,
};
