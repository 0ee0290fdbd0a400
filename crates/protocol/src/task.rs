//! Durable task records.
//!
//! Every hook invocation the gateway keeps becomes a [`Task`]; operator
//! decisions and internal transitions append [`TaskHistoryEntry`] rows. A
//! task leaves `Pending` exactly once and terminal statuses are sticky.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::hook::{EventKind, HookEvent};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Any status other than `Pending`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "approved" => Ok(TaskStatus::Approved),
            "rejected" => Ok(TaskStatus::Rejected),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// An operator's verdict on a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
    Continue,
    Cancel,
}

impl Decision {
    pub const ALL: [Decision; 4] = [
        Decision::Approve,
        Decision::Reject,
        Decision::Continue,
        Decision::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
            Decision::Continue => "continue",
            Decision::Cancel => "cancel",
        }
    }

    /// The task status a decision resolves to.
    pub fn resolved_status(&self) -> TaskStatus {
        match self {
            Decision::Approve => TaskStatus::Approved,
            Decision::Reject => TaskStatus::Rejected,
            Decision::Continue => TaskStatus::Completed,
            Decision::Cancel => TaskStatus::Failed,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Decision::Approve),
            "reject" => Ok(Decision::Reject),
            "continue" => Ok(Decision::Continue),
            "cancel" => Ok(Decision::Cancel),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Durable record of one inbound hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub event_kind: EventKind,
    /// Snapshot of the inbound event as received.
    pub event: HookEvent,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<Decision>,
    /// Operator-supplied context recorded at decision time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<Map<String, Value>>,
}

impl Task {
    /// A fresh pending task for a blocking hook.
    pub fn new(event: HookEvent) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            event_kind: event.kind(),
            event,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            action_taken: None,
            response_payload: None,
        }
    }

    /// An already-resolved task for an immediate hook, kept for audit.
    pub fn completed(event: HookEvent) -> Task {
        let mut task = Task::new(event);
        task.status = TaskStatus::Completed;
        task
    }

    /// True while the task can still accept a decision.
    pub fn is_actionable(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Move to a new status, refreshing `updated_at`.
    pub fn update_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Apply an operator decision: records the action, resolves the status,
    /// and stores whatever context came with it.
    pub fn take_action(&mut self, decision: Decision, response_payload: Option<Map<String, Value>>) {
        self.action_taken = Some(decision);
        self.response_payload = response_payload;
        self.status = decision.resolved_status();
        self.updated_at = Utc::now();
    }
}

/// Append-only audit entry for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    /// Short label: `created`, `notified`, a decision name, `timeout`, `failed`.
    pub action: String,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl TaskHistoryEntry {
    pub fn new(task_id: Uuid, action: impl Into<String>, data: Map<String, Value>) -> Self {
        TaskHistoryEntry {
            id: Uuid::new_v4(),
            task_id,
            action: action.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// Filter for task list queries. Default order is `created_at DESC`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub event_kind: Option<EventKind>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::ToolInput;

    fn bash_event() -> HookEvent {
        HookEvent::PreToolUse {
            session_id: Some("11111111-2222-4333-8444-555555555555".into()),
            cwd: Some("/tmp/project".into()),
            transcript_path: None,
            tool_name: Some("Bash".into()),
            tool_input: Some(ToolInput {
                command: Some("ls -la".into()),
                description: None,
            }),
        }
    }

    #[test]
    fn new_task_starts_pending() {
        let task = Task::new(bash_event());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.event_kind, EventKind::PreToolUse);
        assert!(task.is_actionable());
        assert!(task.action_taken.is_none());
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn take_action_resolves_status() {
        let cases = [
            (Decision::Approve, TaskStatus::Approved),
            (Decision::Reject, TaskStatus::Rejected),
            (Decision::Continue, TaskStatus::Completed),
            (Decision::Cancel, TaskStatus::Failed),
        ];
        for (decision, expected) in cases {
            let mut task = Task::new(bash_event());
            task.take_action(decision, None);
            assert_eq!(task.status, expected);
            assert_eq!(task.action_taken, Some(decision));
            assert!(!task.is_actionable());
            assert!(task.updated_at >= task.created_at);
        }
    }

    #[test]
    fn take_action_keeps_response_payload() {
        let mut task = Task::new(bash_event());
        let mut payload = Map::new();
        payload.insert("comment".into(), Value::String("looks fine".into()));
        task.take_action(Decision::Approve, Some(payload));
        assert_eq!(
            task.response_payload.as_ref().and_then(|m| m.get("comment")),
            Some(&Value::String("looks fine".into()))
        );
    }

    #[test]
    fn only_pending_is_actionable() {
        for status in [
            TaskStatus::Approved,
            TaskStatus::Rejected,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            let mut task = Task::new(bash_event());
            task.update_status(status);
            assert!(!task.is_actionable(), "{status} should not be actionable");
            assert!(status.is_terminal());
        }
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn completed_constructor_is_terminal() {
        let task = Task::completed(bash_event());
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(!task.is_actionable());
    }

    #[test]
    fn status_and_decision_string_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Approved,
            TaskStatus::Rejected,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
        for decision in Decision::ALL {
            assert_eq!(decision.as_str().parse::<Decision>(), Ok(decision));
        }
        assert!("retry".parse::<Decision>().is_err());
    }
}
