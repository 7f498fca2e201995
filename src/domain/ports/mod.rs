//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces storage adapters must implement:
//! - CheckpointLog: append-only flow snapshots
//! - FlowRepository: flow rows and status
//! - DiagnosisRepository: hospital verdicts
//! - StateStore / StateObserver: the recording pipeline's transactional target
//!
//! These traits keep the engine and hospital independent of SQLite.

pub mod checkpoint_log;
pub mod diagnosis_repository;
pub mod flow_repository;
pub mod state_store;

pub use checkpoint_log::CheckpointLog;
pub use diagnosis_repository::DiagnosisRepository;
pub use flow_repository::FlowRepository;
pub use state_store::{StateObserver, StateStore, StateTransaction};
