//! Decision coordination.
//!
//! The coordinator owns the whole blocking-decision flow: persist the task,
//! notify the operator, park the request on a rendezvous carrier, and resume
//! it when a decision, the timeout, or a cancellation wins the race. It is
//! the only writer for Pending→terminal transitions while a waiter is live;
//! the decision ingress writes directly only once the waiter is gone.
//!
//! The rendezvous registry is private here — handlers never touch it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tollgate_protocol::{Decision, EventKind, HookEvent, HookResponse, Task, TaskStatus};

use crate::notify::{Notification, NotificationSender};
use crate::registry::{CarrierGuard, DecisionRegistry, RegistryError};
use crate::store::{StoreError, TaskStore};

/// Event kinds that are persisted even on the immediate path. Everything
/// else is dropped with a log line.
const PERSISTED_IMMEDIATE_KINDS: [EventKind; 5] = [
    EventKind::PreToolUse,
    EventKind::UserPromptSubmit,
    EventKind::Stop,
    EventKind::SubagentStop,
    EventKind::Notification,
];

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to persist task: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors from the operator-facing decision path.
#[derive(Debug, Error)]
pub enum DeliverError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("failed to persist decision: {0}")]
    Store(StoreError),
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Host used to build deep links in notifications.
    pub web_domain: String,
    /// How long a blocking call waits for the operator.
    pub decision_timeout: Duration,
    /// Kinds that fire a push notification when a blocking task is created.
    pub notify_kinds: Vec<EventKind>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            web_domain: "localhost:8080".to_string(),
            decision_timeout: Duration::from_secs(300),
            notify_kinds: vec![EventKind::PreToolUse, EventKind::UserPromptSubmit],
        }
    }
}

pub struct DecisionCoordinator {
    store: Arc<TaskStore>,
    registry: DecisionRegistry,
    notifier: Option<Arc<dyn NotificationSender>>,
    config: CoordinatorConfig,
}

impl DecisionCoordinator {
    pub fn new(
        store: Arc<TaskStore>,
        notifier: Option<Arc<dyn NotificationSender>>,
        config: CoordinatorConfig,
    ) -> DecisionCoordinator {
        DecisionCoordinator {
            store,
            registry: DecisionRegistry::new(),
            notifier,
            config,
        }
    }

    /// Number of blocking calls currently parked. Diagnostic.
    pub fn active_decisions(&self) -> usize {
        self.registry.len()
    }

    /// Shutdown sweep: drop every parked waiter. Their carriers close and
    /// the waiters resolve their tasks as failed on the way out.
    pub fn drain_waiters(&self) {
        if !self.registry.is_empty() {
            warn!(
                component = "coordinator",
                event = "coordinator.drain",
                parked = self.registry.len(),
                "Draining parked decision waiters"
            );
        }
        self.registry.drain();
    }

    /// Whether a live waiter exists for `task_id`.
    pub fn has_pending_decision(&self, task_id: Uuid) -> bool {
        self.registry.has(task_id)
    }

    /// Handle a blocking hook: create the task, notify, then hold the call
    /// open until the operator decides, the timeout fires, or `cancel`
    /// resolves (the agent hung up).
    pub async fn await_decision(
        &self,
        event: HookEvent,
        cancel: impl Future<Output = ()>,
    ) -> Result<HookResponse, CoordinatorError> {
        let kind = event.kind();
        let mut task = Task::new(event);
        self.store.create(&task).await?;

        self.append_history(task.id, "created", created_data(&task, true))
            .await;

        if self.config.notify_kinds.contains(&kind) {
            self.notify(&task).await;
        }

        // From here on the carrier must be released on every exit path.
        let rx = self.registry.open(task.id)?;
        let _carrier = CarrierGuard::new(&self.registry, task.id);

        info!(
            component = "coordinator",
            event = "decision.waiting",
            task_id = %task.id,
            hook = %kind,
            timeout_secs = self.config.decision_timeout.as_secs(),
            "Holding agent call open for operator decision"
        );

        tokio::pin!(cancel);
        let outcome = tokio::select! {
            decision = rx => decision.ok(),
            _ = tokio::time::sleep(self.config.decision_timeout) => {
                return self.resolve_timeout(&mut task).await;
            }
            _ = &mut cancel => {
                return self.resolve_cancelled(&mut task).await;
            }
        };

        // A closed carrier without a decision only happens on shutdown
        // drain; treat it like a cancellation.
        let Some(decision) = outcome else {
            return self.resolve_cancelled(&mut task).await;
        };

        let mut payload = Map::new();
        payload.insert("decision_time".into(), Value::String(now_string()));
        payload.insert("blocking_call".into(), Value::Bool(true));
        task.take_action(decision, Some(payload));
        self.store.update(&task).await?;

        let mut data = Map::new();
        data.insert("blocking_decision".into(), Value::Bool(true));
        self.append_history(task.id, decision.as_str(), data).await;

        info!(
            component = "coordinator",
            event = "decision.resolved",
            task_id = %task.id,
            decision = %decision,
            "Operator decision resumed the agent call"
        );

        Ok(HookResponse::from_decision(decision))
    }

    async fn resolve_timeout(&self, task: &mut Task) -> Result<HookResponse, CoordinatorError> {
        task.update_status(TaskStatus::Failed);
        if let Err(e) = self.store.update(task).await {
            // The agent already waited the full window; give it the timeout
            // verdict even if the row update failed.
            error!(
                component = "coordinator",
                event = "decision.timeout.persist_failed",
                task_id = %task.id,
                error = %e,
                "Failed to mark timed-out task as failed"
            );
        }

        let mut data = Map::new();
        data.insert(
            "timeout_secs".into(),
            Value::from(self.config.decision_timeout.as_secs()),
        );
        self.append_history(task.id, "timeout", data).await;

        warn!(
            component = "coordinator",
            event = "decision.timeout",
            task_id = %task.id,
            "No operator decision before the deadline"
        );

        Ok(HookResponse::timeout(self.config.decision_timeout))
    }

    async fn resolve_cancelled(&self, task: &mut Task) -> Result<HookResponse, CoordinatorError> {
        task.update_status(TaskStatus::Failed);
        if let Err(e) = self.store.update(task).await {
            error!(
                component = "coordinator",
                event = "decision.cancel.persist_failed",
                task_id = %task.id,
                error = %e,
                "Failed to mark cancelled task as failed"
            );
        }

        let mut data = Map::new();
        data.insert("reason".into(), Value::String("cancelled".into()));
        self.append_history(task.id, "failed", data).await;

        info!(
            component = "coordinator",
            event = "decision.cancelled",
            task_id = %task.id,
            "Agent went away before a decision arrived"
        );

        // Nobody is left to read this, but the mapping stays total.
        Ok(HookResponse::rejected("cancelled"))
    }

    /// Handle an immediate hook: optionally persist for audit, respond at
    /// once.
    pub async fn record_immediate(&self, event: HookEvent) -> HookResponse {
        let kind = event.kind();

        if PERSISTED_IMMEDIATE_KINDS.contains(&kind) {
            let task = Task::completed(event);
            match self.store.create(&task).await {
                Ok(()) => {
                    self.append_history(task.id, "created", created_data(&task, false))
                        .await;
                    debug!(
                        component = "coordinator",
                        event = "immediate.recorded",
                        task_id = %task.id,
                        hook = %kind,
                        "Recorded immediate hook"
                    );
                }
                Err(e) => {
                    // Audit-only write; the agent still gets its continue.
                    warn!(
                        component = "coordinator",
                        event = "immediate.persist_failed",
                        hook = %kind,
                        error = %e,
                        "Failed to record immediate hook"
                    );
                }
            }
        } else {
            debug!(
                component = "coordinator",
                event = "immediate.dropped",
                hook = %kind,
                session_id = event.session_id().unwrap_or("-"),
                "Immediate hook not persisted"
            );
        }

        // Notifications are meant for the agent user; keep their stdout
        // visible. Everything else stays quiet.
        match kind {
            EventKind::Notification => HookResponse::proceed(),
            _ => HookResponse::suppressed(),
        }
    }

    /// Deliver an operator decision for `task_id`.
    ///
    /// When a waiter is live the decision travels through the carrier and the
    /// waiter persists the outcome. When the waiter is gone (timed out,
    /// crashed mid-wait, or never existed) the durable record is updated
    /// directly so the operator's choice is never lost. A task that already
    /// reached a terminal status is left untouched — late decisions are
    /// acknowledged and ignored.
    pub async fn deliver_decision(
        &self,
        task_id: Uuid,
        decision: Decision,
        metadata: Map<String, Value>,
    ) -> Result<(), DeliverError> {
        let task = self.store.get(task_id).await.map_err(map_deliver_err)?;

        if !task.is_actionable() {
            info!(
                component = "coordinator",
                event = "decision.late",
                task_id = %task_id,
                status = %task.status,
                decision = %decision,
                "Late decision for a terminal task; ignoring"
            );
            return Ok(());
        }

        if self.registry.has(task_id) {
            if self.registry.deliver(task_id, decision) {
                info!(
                    component = "coordinator",
                    event = "decision.delivered",
                    task_id = %task_id,
                    decision = %decision,
                    "Decision handed to waiting agent call"
                );
                return Ok(());
            }
            debug!(
                component = "coordinator",
                event = "decision.delivery_lost_race",
                task_id = %task_id,
                "Waiter exited while delivering; falling back to direct update"
            );
        }

        // No live waiter. Re-read before writing — the waiter may have
        // marked the task failed between our first read and now.
        let mut task = self.store.get(task_id).await.map_err(map_deliver_err)?;
        if !task.is_actionable() {
            info!(
                component = "coordinator",
                event = "decision.late",
                task_id = %task_id,
                status = %task.status,
                "Task resolved while delivering; ignoring"
            );
            return Ok(());
        }

        let mut payload = metadata.clone();
        payload.insert("decision_time".into(), Value::String(now_string()));
        task.take_action(decision, Some(payload));
        self.store
            .update(&task)
            .await
            .map_err(DeliverError::Store)?;
        self.append_history(task_id, decision.as_str(), metadata)
            .await;

        info!(
            component = "coordinator",
            event = "decision.recorded_direct",
            task_id = %task_id,
            decision = %decision,
            "Decision recorded without a live waiter"
        );
        Ok(())
    }

    async fn notify(&self, task: &Task) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notification = Notification::for_task(task.id, task.event_kind, &self.config.web_domain);
        match notifier.send(&notification).await {
            Ok(()) => {
                let mut data = Map::new();
                data.insert("title".into(), Value::String(notification.title.clone()));
                self.append_history(task.id, "notified", data).await;
            }
            Err(e) => {
                warn!(
                    component = "coordinator",
                    event = "notify.failed",
                    task_id = %task.id,
                    error = %e,
                    "Push notification failed"
                );
            }
        }
    }

    /// History writes are audit; failures are logged and recovered locally.
    async fn append_history(&self, task_id: Uuid, action: &str, data: Map<String, Value>) {
        if let Err(e) = self.store.append_history(task_id, action, data).await {
            warn!(
                component = "coordinator",
                event = "history.append_failed",
                task_id = %task_id,
                action = action,
                error = %e,
                "Failed to append task history"
            );
        }
    }
}

fn created_data(task: &Task, blocking: bool) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert(
        "event_kind".into(),
        Value::String(task.event_kind.as_wire().into()),
    );
    if let Some(session_id) = task.event.session_id() {
        data.insert("session_id".into(), Value::String(session_id.into()));
    }
    if let Some(tool_name) = task.event.tool_name() {
        data.insert("tool_name".into(), Value::String(tool_name.into()));
    }
    data.insert("blocking".into(), Value::Bool(blocking));
    data
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn map_deliver_err(e: StoreError) -> DeliverError {
    match e {
        StoreError::NotFound(id) => DeliverError::NotFound(id),
        other => DeliverError::Store(other),
    }
}
