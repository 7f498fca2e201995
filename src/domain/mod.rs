//! Domain layer for the flow triage system
//!
//! This module contains the flow, checkpoint and diagnosis models, the
//! domain errors and the storage ports.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, FlowError, RecordingError};
