//! Staff Panel
//!
//! An ordered chain of diagnosticians. The panel asks each member in turn and
//! the first one that does not abstain decides the verdict. If everybody
//! abstains the flow is kept overnight as unclassified.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};
use uuid::Uuid;

use super::condition_registry::ConditionRegistry;
use crate::domain::models::{Assessment, Failure, FailureClass, FailureKind, Verdict};

/// Facts about the admission a staff member may take into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionContext {
    pub flow_id: Uuid,
    /// 1-based admission counter, including the current one.
    pub admission: u32,
    pub checkpoint_sequence: u64,
}

/// A diagnostic rule.
pub trait StaffMember: Send + Sync {
    /// Stable identifier recorded in diagnoses and passed to hooks.
    fn id(&self) -> &str;

    fn evaluate(&self, failure: &Failure, context: &AdmissionContext) -> Assessment;
}

/// Outcome of one panel evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelDecision {
    /// Staff consulted, in order, up to and including the deciding member.
    pub consulted: Vec<String>,
    pub verdict: Verdict,
    pub classification: FailureClass,
}

pub struct FatalFailureSpecialist;

impl StaffMember for FatalFailureSpecialist {
    fn id(&self) -> &str {
        "fatal_failure_specialist"
    }

    fn evaluate(&self, failure: &Failure, _context: &AdmissionContext) -> Assessment {
        match failure.kind {
            FailureKind::Fatal => Assessment::terminal(),
            _ => Assessment::Abstain,
        }
    }
}

/// Keeps data-integrity failures overnight. Registered conditions are
/// consulted first, for every failure reaching this member.
pub struct PersistenceSpecialist {
    conditions: Arc<ConditionRegistry>,
}

impl PersistenceSpecialist {
    pub fn new(conditions: Arc<ConditionRegistry>) -> Self {
        Self { conditions }
    }
}

impl StaffMember for PersistenceSpecialist {
    fn id(&self) -> &str {
        "persistence_specialist"
    }

    fn evaluate(&self, failure: &Failure, context: &AdmissionContext) -> Assessment {
        if let Some(condition) = self.conditions.first_match(failure) {
            debug!(flow_id = %context.flow_id, condition = %condition, "condition matched");
            return Assessment::overnight(FailureClass::DataIntegrity);
        }

        match failure.kind {
            FailureKind::Persistence(_) => Assessment::overnight(FailureClass::DataIntegrity),
            _ => Assessment::Abstain,
        }
    }
}

/// Resuscitates transient failures until the flow has used up its retries.
pub struct TransientFailureSpecialist {
    max_resuscitations: u32,
}

impl TransientFailureSpecialist {
    pub fn new(max_resuscitations: u32) -> Self {
        Self { max_resuscitations }
    }
}

impl StaffMember for TransientFailureSpecialist {
    fn id(&self) -> &str {
        "transient_failure_specialist"
    }

    fn evaluate(&self, failure: &Failure, context: &AdmissionContext) -> Assessment {
        let previous_admissions = context.admission.saturating_sub(1);
        match failure.kind {
            FailureKind::Transient if previous_admissions < self.max_resuscitations => {
                Assessment::resuscitate()
            }
            _ => Assessment::Abstain,
        }
    }
}

/// Catch-all for anything raised inside the recording pipeline.
pub struct RecordingFailureTriage;

impl StaffMember for RecordingFailureTriage {
    fn id(&self) -> &str {
        "recording_failure_triage"
    }

    fn evaluate(&self, failure: &Failure, _context: &AdmissionContext) -> Assessment {
        if failure.origin.is_recording() {
            Assessment::overnight(FailureClass::Recording)
        } else {
            Assessment::Abstain
        }
    }
}

pub struct StaffPanel {
    builtins: Vec<Arc<dyn StaffMember>>,
    members: RwLock<Vec<Arc<dyn StaffMember>>>,
}

impl StaffPanel {
    pub fn new(members: Vec<Arc<dyn StaffMember>>) -> Self {
        Self {
            members: RwLock::new(members.clone()),
            builtins: members,
        }
    }

    /// The default panel: fatal, persistence, transient, recording triage.
    pub fn with_builtins(conditions: Arc<ConditionRegistry>, max_resuscitations: u32) -> Self {
        Self::new(vec![
            Arc::new(FatalFailureSpecialist),
            Arc::new(PersistenceSpecialist::new(conditions)),
            Arc::new(TransientFailureSpecialist::new(max_resuscitations)),
            Arc::new(RecordingFailureTriage),
        ])
    }

    /// Insert a member at `position`; positions past the end append.
    pub fn register(&self, position: usize, member: Arc<dyn StaffMember>) {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        let position = position.min(members.len());
        debug!(staff = %member.id(), position, "registering staff member");
        members.insert(position, member);
    }

    /// Drop custom members, restoring the panel the hospital started with.
    pub fn reset(&self) {
        *self.members.write().unwrap_or_else(PoisonError::into_inner) = self.builtins.clone();
    }

    pub fn ids(&self) -> Vec<String> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|m| m.id().to_string())
            .collect()
    }

    pub fn evaluate(&self, failure: &Failure, context: &AdmissionContext) -> PanelDecision {
        let members = self.members.read().unwrap_or_else(PoisonError::into_inner).clone();
        let mut consulted = Vec::with_capacity(members.len());

        for member in &members {
            consulted.push(member.id().to_string());
            let assessment = catch_unwind(AssertUnwindSafe(|| member.evaluate(failure, context)))
                .unwrap_or_else(|_| {
                    warn!(flow_id = %context.flow_id, staff = %member.id(), "staff member panicked; abstaining");
                    Assessment::Abstain
                });

            if let Assessment::Prescribe { verdict, class } = assessment {
                return PanelDecision {
                    consulted,
                    verdict,
                    classification: class,
                };
            }
        }

        PanelDecision {
            consulted,
            verdict: Verdict::Overnight,
            classification: FailureClass::Unclassified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FailureOrigin, PersistenceFault};
    use crate::services::condition_registry::Condition;
    use proptest::prelude::*;

    fn context(admission: u32) -> AdmissionContext {
        AdmissionContext {
            flow_id: Uuid::new_v4(),
            admission,
            checkpoint_sequence: 0,
        }
    }

    fn default_panel() -> StaffPanel {
        StaffPanel::with_builtins(Arc::new(ConditionRegistry::new()), 3)
    }

    struct Fixed {
        id: String,
        assessment: Assessment,
    }

    impl StaffMember for Fixed {
        fn id(&self) -> &str {
            &self.id
        }

        fn evaluate(&self, _failure: &Failure, _context: &AdmissionContext) -> Assessment {
            self.assessment
        }
    }

    #[test]
    fn test_fatal_failure_is_terminal() {
        let decision = default_panel().evaluate(&Failure::fatal("corrupt ledger"), &context(1));
        assert_eq!(decision.verdict, Verdict::Terminal);
        assert_eq!(decision.consulted, vec!["fatal_failure_specialist"]);
    }

    #[test]
    fn test_transient_failure_is_resuscitated_until_limit() {
        let panel = default_panel();
        let failure = Failure::transient("connection reset");

        assert_eq!(panel.evaluate(&failure, &context(3)).verdict, Verdict::Resuscitate);

        let exhausted = panel.evaluate(&failure, &context(4));
        assert_eq!(exhausted.verdict, Verdict::Overnight);
        assert_eq!(exhausted.classification, FailureClass::Unclassified);
        assert_eq!(exhausted.consulted.len(), 4);
    }

    #[test]
    fn test_persistence_fault_is_kept_overnight() {
        let failure = Failure::persistence(PersistenceFault::QuerySyntax, "near SELEC")
            .with_origin(FailureOrigin::Observer { name: "ledger".into() });
        let decision = default_panel().evaluate(&failure, &context(1));

        assert_eq!(decision.verdict, Verdict::Overnight);
        assert_eq!(decision.classification, FailureClass::DataIntegrity);
        assert_eq!(decision.consulted, vec!["fatal_failure_specialist", "persistence_specialist"]);
    }

    #[test]
    fn test_registered_condition_claims_failure() {
        let conditions = Arc::new(ConditionRegistry::new());
        conditions.register(Condition::new("bad-amount", |f: &Failure| f.message.contains("amount")));
        let panel = StaffPanel::with_builtins(conditions, 3);

        let decision = panel.evaluate(&Failure::invalid_argument("amount < 0"), &context(1));
        assert_eq!(decision.classification, FailureClass::DataIntegrity);
    }

    #[test]
    fn test_recording_failure_is_triaged() {
        let failure = Failure::other("boom").with_origin(FailureOrigin::RecordingWrite);
        let decision = default_panel().evaluate(&failure, &context(1));
        assert_eq!(decision.classification, FailureClass::Recording);
        assert_eq!(decision.consulted.last().map(String::as_str), Some("recording_failure_triage"));
    }

    #[test]
    fn test_register_and_reset() {
        let panel = default_panel();
        panel.register(
            0,
            Arc::new(Fixed {
                id: "always_retry".into(),
                assessment: Assessment::resuscitate(),
            }),
        );
        panel.register(
            99,
            Arc::new(Fixed {
                id: "tail".into(),
                assessment: Assessment::Abstain,
            }),
        );
        assert_eq!(panel.ids().first().map(String::as_str), Some("always_retry"));
        assert_eq!(panel.ids().last().map(String::as_str), Some("tail"));
        assert_eq!(panel.evaluate(&Failure::fatal("x"), &context(1)).verdict, Verdict::Resuscitate);

        panel.reset();
        assert_eq!(panel.ids().len(), 4);
        assert_eq!(panel.evaluate(&Failure::fatal("x"), &context(1)).verdict, Verdict::Terminal);
    }

    fn assessment_strategy() -> impl Strategy<Value = Assessment> {
        prop_oneof![
            Just(Assessment::Abstain),
            Just(Assessment::resuscitate()),
            Just(Assessment::overnight(FailureClass::DataIntegrity)),
            Just(Assessment::terminal()),
        ]
    }

    proptest! {
        #[test]
        fn prop_first_non_abstain_wins(assessments in prop::collection::vec(assessment_strategy(), 0..8)) {
            let members: Vec<Arc<dyn StaffMember>> = assessments
                .iter()
                .enumerate()
                .map(|(i, a)| Arc::new(Fixed { id: format!("staff_{i}"), assessment: *a }) as Arc<dyn StaffMember>)
                .collect();
            let panel = StaffPanel::new(members);
            let decision = panel.evaluate(&Failure::other("x"), &context(1));

            match assessments.iter().position(|a| *a != Assessment::Abstain) {
                Some(winner) => {
                    prop_assert_eq!(Some(decision.verdict), assessments[winner].verdict());
                    prop_assert_eq!(decision.consulted.len(), winner + 1);
                }
                None => {
                    prop_assert_eq!(decision.verdict, Verdict::Overnight);
                    prop_assert_eq!(decision.classification, FailureClass::Unclassified);
                    prop_assert_eq!(decision.consulted.len(), assessments.len());
                }
            }
        }
    }
}
