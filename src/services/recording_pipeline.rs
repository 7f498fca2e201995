//! Recording Pipeline
//!
//! Writes domain states and notifies every registered observer inside one
//! store transaction. The transaction commits only if the write and every
//! observer succeed; otherwise it is rolled back and the caller receives a
//! [`RecordingError`] carrying the original failure.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::RecordingError;
use crate::domain::models::{Failure, FailureOrigin, RecordedState, StateUpdate};
use crate::domain::ports::{StateObserver, StateStore, StateTransaction};

pub struct RecordingPipeline {
    store: Arc<dyn StateStore>,
    observers: RwLock<Vec<Arc<dyn StateObserver>>>,
}

impl RecordingPipeline {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn register_observer(&self, observer: Arc<dyn StateObserver>) {
        debug!(observer = %observer.name(), "registering state observer");
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn clear_observers(&self) {
        self.observers.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Record `states` for a flow. An empty batch is a successful no-op.
    #[instrument(skip(self, states), fields(count = states.len()))]
    pub async fn record_states(&self, flow_id: Uuid, states: Vec<RecordedState>) -> Result<StateUpdate, RecordingError> {
        if states.is_empty() {
            return Ok(StateUpdate::new(flow_id, states));
        }

        let fail = |failure: Failure| RecordingError::new(flow_id, failure);

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|f| fail(f.with_origin(FailureOrigin::RecordingWrite)))?;

        if let Err(failure) = tx.write(flow_id, &states).await {
            rollback(tx, flow_id).await;
            return Err(fail(failure.with_origin(FailureOrigin::RecordingWrite)));
        }

        let update = StateUpdate::new(flow_id, states);
        if let Err(failure) = self.notify(&update) {
            rollback(tx, flow_id).await;
            return Err(fail(failure));
        }

        tx.commit()
            .await
            .map_err(|f| fail(f.with_origin(FailureOrigin::RecordingWrite)))?;

        debug!(flow_id = %flow_id, "states recorded");
        Ok(update)
    }

    /// Notify observers in registration order, stopping at the first failure.
    fn notify(&self, update: &StateUpdate) -> Result<(), Failure> {
        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner).clone();

        for observer in &observers {
            let origin = FailureOrigin::Observer {
                name: observer.name().to_string(),
            };
            match catch_unwind(AssertUnwindSafe(|| observer.on_recorded(update))) {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => return Err(failure.with_origin(origin)),
                Err(_) => return Err(Failure::other("observer panicked").with_origin(origin)),
            }
        }
        Ok(())
    }
}

async fn rollback(tx: Box<dyn StateTransaction>, flow_id: Uuid) {
    if let Err(failure) = tx.rollback().await {
        warn!(flow_id = %flow_id, failure = %failure, "rollback of recording transaction failed");
    }
}
