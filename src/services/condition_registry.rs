//! Condition Registry
//!
//! Ordered, resettable collection of failure-matching predicates consulted by
//! the persistence specialist. Owned by a `FlowHospital`; there is no
//! process-wide instance.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::domain::models::Failure;

pub type ConditionPredicate = Arc<dyn Fn(&Failure) -> bool + Send + Sync>;

/// A named failure predicate.
#[derive(Clone)]
pub struct Condition {
    name: String,
    predicate: ConditionPredicate,
}

impl Condition {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Failure) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A panicking predicate counts as no match.
    pub fn matches(&self, failure: &Failure) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.predicate)(failure))) {
            Ok(matched) => matched,
            Err(_) => {
                warn!(condition = %self.name, "condition predicate panicked; treating as no match");
                false
            }
        }
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ConditionRegistry {
    conditions: RwLock<Vec<Condition>>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, condition: Condition) {
        debug!(condition = %condition.name, "registering condition");
        self.conditions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(condition);
    }

    pub fn clear(&self) {
        self.conditions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.conditions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the first condition, in registration order, matching the failure.
    pub fn first_match(&self, failure: &Failure) -> Option<String> {
        // Predicates run outside the lock so they may register further conditions.
        let snapshot = self.conditions.read().unwrap_or_else(PoisonError::into_inner).clone();
        snapshot
            .iter()
            .find(|condition| condition.matches(failure))
            .map(|condition| condition.name.clone())
    }
}
