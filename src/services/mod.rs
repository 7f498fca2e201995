//! Service layer: the flow engine, the recording pipeline and the flow
//! hospital with its staff panel and extension registries.

pub mod condition_registry;
pub mod flow_engine;
pub mod flow_hospital;
pub mod observation_hooks;
pub mod recording_pipeline;
pub mod staff;

pub use condition_registry::{Condition, ConditionPredicate, ConditionRegistry};
pub use flow_engine::{
    Discharge, FlowDefinition, FlowEngine, FlowEngineDeps, FlowHandle, FlowOutcome, FlowRegistry,
    RecoveryReport, StepContext, StepTransition,
};
pub use flow_hospital::{FlowHospital, OPERATOR};
pub use observation_hooks::{ObservationCallback, ObservationHooks};
pub use recording_pipeline::RecordingPipeline;
pub use staff::{
    AdmissionContext, FatalFailureSpecialist, PanelDecision, PersistenceSpecialist, RecordingFailureTriage,
    StaffMember, StaffPanel, TransientFailureSpecialist,
};
