//! Application state shared across request handlers.

use std::sync::Arc;

use crate::coordinator::DecisionCoordinator;
use crate::store::TaskStore;

/// Shared handles; cheap to clone per request.
///
/// The rendezvous registry lives inside the coordinator on purpose —
/// handlers route every decision through it and never touch the registry
/// directly.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DecisionCoordinator>,
    pub store: Arc<TaskStore>,
}

impl AppState {
    pub fn new(coordinator: Arc<DecisionCoordinator>, store: Arc<TaskStore>) -> AppState {
        AppState { coordinator, store }
    }
}
