//! Observation Hooks
//!
//! Multi-subscriber callback lists fired by the flow hospital on admission,
//! overnight observation and discharge. Hooks are best-effort: an error or a
//! panic in one hook is logged and the remaining hooks still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;
use uuid::Uuid;

use crate::domain::models::{ObservationEvent, ObservationKind};

/// Receives the flow id and the staff consulted so far.
pub type ObservationCallback = Arc<dyn Fn(Uuid, &[String]) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct ObservationHooks {
    admitted: RwLock<Vec<ObservationCallback>>,
    kept_overnight: RwLock<Vec<ObservationCallback>>,
    discharged: RwLock<Vec<ObservationCallback>>,
}

impl ObservationHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_admitted<F>(&self, callback: F)
    where
        F: Fn(Uuid, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(ObservationKind::Admitted, Arc::new(callback));
    }

    pub fn on_kept_overnight<F>(&self, callback: F)
    where
        F: Fn(Uuid, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(ObservationKind::KeptOvernight, Arc::new(callback));
    }

    pub fn on_discharged<F>(&self, callback: F)
    where
        F: Fn(Uuid, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(ObservationKind::Discharged, Arc::new(callback));
    }

    pub fn clear(&self) {
        for list in [&self.admitted, &self.kept_overnight, &self.discharged] {
            list.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    pub fn count(&self, kind: ObservationKind) -> usize {
        self.list(kind).read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Invoke every hook registered for the event's kind, in registration order.
    pub fn fire(&self, event: &ObservationEvent) {
        let callbacks = self.list(event.kind).read().unwrap_or_else(PoisonError::into_inner).clone();

        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(event.flow_id, &event.staff))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(
                    flow_id = %event.flow_id,
                    hook = index,
                    kind = %event.kind,
                    error = %error,
                    "observation hook failed"
                ),
                Err(_) => warn!(
                    flow_id = %event.flow_id,
                    hook = index,
                    kind = %event.kind,
                    "observation hook panicked"
                ),
            }
        }
    }

    fn push(&self, kind: ObservationKind, callback: ObservationCallback) {
        self.list(kind).write().unwrap_or_else(PoisonError::into_inner).push(callback);
    }

    fn list(&self, kind: ObservationKind) -> &RwLock<Vec<ObservationCallback>> {
        match kind {
            ObservationKind::Admitted => &self.admitted,
            ObservationKind::KeptOvernight => &self.kept_overnight,
            ObservationKind::Discharged => &self.discharged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_hooks_fire_in_registration_order() {
        let hooks = ObservationHooks::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let seen = seen.clone();
            hooks.on_kept_overnight(move |_, staff| {
                seen.lock().unwrap().push(format!("{label}:{}", staff.join(",")));
                Ok(())
            });
        }

        let event = ObservationEvent::new(
            Uuid::new_v4(),
            ObservationKind::KeptOvernight,
            vec!["fatal_failure_specialist".into()],
        );
        hooks.fire(&event);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:fatal_failure_specialist", "second:fatal_failure_specialist"]
        );
    }

    #[test]
    fn test_failing_hooks_do_not_stop_the_rest() {
        let hooks = ObservationHooks::new();
        let reached = Arc::new(Mutex::new(0));

        hooks.on_admitted(|_, _| anyhow::bail!("monitoring offline"));
        hooks.on_admitted(|_, _| panic!("hook bug"));
        let counter = reached.clone();
        hooks.on_admitted(move |_, _| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        hooks.fire(&ObservationEvent::new(Uuid::new_v4(), ObservationKind::Admitted, vec![]));
        assert_eq!(*reached.lock().unwrap(), 1);
    }

    #[test]
    fn test_kinds_are_isolated_and_clearable() {
        let hooks = ObservationHooks::new();
        hooks.on_admitted(|_, _| Ok(()));
        hooks.on_discharged(|_, _| Ok(()));

        assert_eq!(hooks.count(ObservationKind::Admitted), 1);
        assert_eq!(hooks.count(ObservationKind::KeptOvernight), 0);

        hooks.clear();
        assert_eq!(hooks.count(ObservationKind::Discharged), 0);
    }
}
