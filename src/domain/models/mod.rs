pub mod checkpoint;
pub mod config;
pub mod diagnosis;
pub mod failure;
pub mod flow;
pub mod observation;
pub mod recording;

pub use checkpoint::Checkpoint;
pub use config::{
    Config, DatabaseConfig, EngineConfig, HospitalConfig, LoggingConfig, RecoveryConfig,
};
pub use diagnosis::{Assessment, Diagnosis, FailureClass, Verdict};
pub use failure::{Failure, FailureKind, FailureOrigin, PersistenceFault};
pub use flow::{Flow, FlowSnapshot, FlowStatus};
pub use observation::{ObservationEvent, ObservationKind};
pub use recording::{RecordedState, StateUpdate};
