//! Rendezvous registry for blocking decisions.
//!
//! A process-local map from task id to a single-shot decision carrier. The
//! waiting coordinator invocation owns the receiving half; the registry only
//! keeps the sending half alive long enough for the decision ingress to find
//! it. Entries never outlive their waiter — every exit path closes the
//! carrier, so an empty registry means no in-flight blocking calls.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use tollgate_protocol::Decision;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Task ids are unique, so a second `open` on the same id is a
    /// programming error rather than something to paper over.
    #[error("decision carrier already open for task {0}")]
    AlreadyOpen(Uuid),
}

/// Thread-safe map of in-flight decision carriers.
///
/// The slot holds `Some(sender)` until a decision is delivered; a consumed
/// slot stays in the map (as `None`) until the waiter closes it, so `has`
/// keeps answering truthfully while the waiter wakes up.
#[derive(Default)]
pub struct DecisionRegistry {
    carriers: RwLock<HashMap<Uuid, Option<oneshot::Sender<Decision>>>>,
}

impl DecisionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a carrier for `task_id` and hand back the receiving half.
    pub fn open(&self, task_id: Uuid) -> Result<oneshot::Receiver<Decision>, RegistryError> {
        let mut carriers = self.carriers.write().expect("registry lock poisoned");
        if carriers.contains_key(&task_id) {
            return Err(RegistryError::AlreadyOpen(task_id));
        }
        let (tx, rx) = oneshot::channel();
        carriers.insert(task_id, Some(tx));
        Ok(rx)
    }

    /// Deliver a decision to a waiting carrier without blocking.
    ///
    /// Returns `false` when there is no carrier, the slot was already
    /// consumed, or the waiter has gone away — late deliveries are simply
    /// discarded.
    pub fn deliver(&self, task_id: Uuid, decision: Decision) -> bool {
        let mut carriers = self.carriers.write().expect("registry lock poisoned");
        match carriers.get_mut(&task_id) {
            Some(slot) => match slot.take() {
                Some(tx) => tx.send(decision).is_ok(),
                None => {
                    debug!(
                        component = "registry",
                        event = "registry.deliver.slot_consumed",
                        task_id = %task_id,
                        "Carrier already consumed; decision discarded"
                    );
                    false
                }
            },
            None => false,
        }
    }

    /// Remove the carrier for `task_id`. Safe to call repeatedly.
    pub fn close(&self, task_id: Uuid) {
        let mut carriers = self.carriers.write().expect("registry lock poisoned");
        carriers.remove(&task_id);
    }

    /// Whether a carrier exists for `task_id`.
    pub fn has(&self, task_id: Uuid) -> bool {
        let carriers = self.carriers.read().expect("registry lock poisoned");
        carriers.contains_key(&task_id)
    }

    /// Number of open carriers. Diagnostic only.
    pub fn len(&self) -> usize {
        let carriers = self.carriers.read().expect("registry lock poisoned");
        carriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Emergency sweep: drop every carrier. Tests and shutdown only.
    pub fn drain(&self) {
        let mut carriers = self.carriers.write().expect("registry lock poisoned");
        carriers.clear();
    }
}

/// Closes a carrier when the waiter exits, whichever way it exits.
pub struct CarrierGuard<'a> {
    registry: &'a DecisionRegistry,
    task_id: Uuid,
}

impl<'a> CarrierGuard<'a> {
    pub fn new(registry: &'a DecisionRegistry, task_id: Uuid) -> Self {
        CarrierGuard { registry, task_id }
    }
}

impl Drop for CarrierGuard<'_> {
    fn drop(&mut self) {
        self.registry.close(self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deliver_wakes_the_waiter() {
        let registry = DecisionRegistry::new();
        let id = Uuid::new_v4();

        let rx = registry.open(id).expect("open");
        assert!(registry.has(id));
        assert_eq!(registry.len(), 1);

        assert!(registry.deliver(id, Decision::Approve));
        assert_eq!(rx.await, Ok(Decision::Approve));
    }

    #[test]
    fn duplicate_open_fails() {
        let registry = DecisionRegistry::new();
        let id = Uuid::new_v4();

        let _rx = registry.open(id).expect("first open");
        assert!(matches!(
            registry.open(id),
            Err(RegistryError::AlreadyOpen(_))
        ));
    }

    #[test]
    fn second_delivery_is_discarded() {
        let registry = DecisionRegistry::new();
        let id = Uuid::new_v4();

        let _rx = registry.open(id).expect("open");
        assert!(registry.deliver(id, Decision::Approve));
        assert!(!registry.deliver(id, Decision::Reject));
    }

    #[test]
    fn deliver_without_carrier_is_discarded() {
        let registry = DecisionRegistry::new();
        assert!(!registry.deliver(Uuid::new_v4(), Decision::Approve));
    }

    #[test]
    fn deliver_after_waiter_dropped_reports_failure() {
        let registry = DecisionRegistry::new();
        let id = Uuid::new_v4();

        let rx = registry.open(id).expect("open");
        drop(rx);
        assert!(!registry.deliver(id, Decision::Approve));
    }

    #[test]
    fn close_is_idempotent() {
        let registry = DecisionRegistry::new();
        let id = Uuid::new_v4();

        let _rx = registry.open(id).expect("open");
        registry.close(id);
        registry.close(id);
        assert!(!registry.has(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn closed_id_can_not_be_reused_accidentally() {
        // Closing releases the slot; a fresh open on the same id is a new
        // carrier, not a resurrection of the old one.
        let registry = DecisionRegistry::new();
        let id = Uuid::new_v4();

        let rx = registry.open(id).expect("open");
        registry.close(id);
        drop(rx);

        let _rx2 = registry.open(id).expect("reopen after close");
        assert!(registry.has(id));
    }

    #[test]
    fn drain_clears_everything() {
        let registry = DecisionRegistry::new();
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let _rxs: Vec<_> = ids.iter().map(|id| registry.open(*id).unwrap()).collect();
        assert_eq!(registry.len(), 4);

        registry.drain();
        assert!(registry.is_empty());
        for id in ids {
            assert!(!registry.has(id));
        }
    }

    #[test]
    fn guard_closes_on_drop() {
        let registry = DecisionRegistry::new();
        let id = Uuid::new_v4();
        let _rx = registry.open(id).expect("open");
        {
            let _guard = CarrierGuard::new(&registry, id);
            assert!(registry.has(id));
        }
        assert!(!registry.has(id));
    }
}
