//! Hospital verdicts and diagnosis records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::failure::Failure;

/// Final decision for one escalated failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Retry from the last committed checkpoint.
    Resuscitate,
    /// Keep hospitalized until an operator intervenes.
    Overnight,
    /// Fail permanently.
    Terminal,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resuscitate => "resuscitate",
            Self::Overnight => "overnight",
            Self::Terminal => "terminal",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "resuscitate" => Some(Self::Resuscitate),
            "overnight" => Some(Self::Overnight),
            "terminal" => Some(Self::Terminal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    TransientInfrastructure,
    DataIntegrity,
    /// Raised inside the recording pipeline and not otherwise classified.
    Recording,
    Unclassified,
    Terminal,
    /// Verdict imposed by an operator rather than the panel.
    Operator,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientInfrastructure => "transient_infrastructure",
            Self::DataIntegrity => "data_integrity",
            Self::Recording => "recording",
            Self::Unclassified => "unclassified",
            Self::Terminal => "terminal",
            Self::Operator => "operator",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "transient_infrastructure" => Some(Self::TransientInfrastructure),
            "data_integrity" => Some(Self::DataIntegrity),
            "recording" => Some(Self::Recording),
            "unclassified" => Some(Self::Unclassified),
            "terminal" => Some(Self::Terminal),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A staff member's answer for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    Abstain,
    Prescribe { verdict: Verdict, class: FailureClass },
}

impl Assessment {
    pub fn resuscitate() -> Self {
        Self::Prescribe {
            verdict: Verdict::Resuscitate,
            class: FailureClass::TransientInfrastructure,
        }
    }

    pub fn overnight(class: FailureClass) -> Self {
        Self::Prescribe {
            verdict: Verdict::Overnight,
            class,
        }
    }

    pub fn terminal() -> Self {
        Self::Prescribe {
            verdict: Verdict::Terminal,
            class: FailureClass::Terminal,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::Abstain => None,
            Self::Prescribe { verdict, .. } => Some(*verdict),
        }
    }
}

/// Immutable record of the hospital's decision for one escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: Uuid,
    pub flow_id: Uuid,
    /// 1-based admission counter for this flow.
    pub admission: u32,
    /// Highest committed checkpoint at the time of admission.
    pub checkpoint_sequence: u64,
    /// Staff ids in the order they were consulted.
    pub staff_consulted: Vec<String>,
    pub verdict: Verdict,
    pub classification: FailureClass,
    pub failure: Option<Failure>,
    pub diagnosed_at: DateTime<Utc>,
}

impl Diagnosis {
    pub fn new(
        flow_id: Uuid,
        admission: u32,
        checkpoint_sequence: u64,
        staff_consulted: Vec<String>,
        verdict: Verdict,
        classification: FailureClass,
        failure: Option<Failure>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            admission,
            checkpoint_sequence,
            staff_consulted,
            verdict,
            classification,
            failure,
            diagnosed_at: Utc::now(),
        }
    }
}
