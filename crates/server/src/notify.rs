//! Best-effort push notifications via ntfy.
//!
//! The coordinator fires one notification per blocking task so the operator's
//! phone gets a deep link to the decision page. Delivery failures are logged
//! and never surfaced to the agent.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use tollgate_protocol::EventKind;

/// ntfy message priority, 1 (min) to 5 (urgent) on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    fn as_ntfy(&self) -> u8 {
        match self {
            Priority::Low => 2,
            Priority::Normal => 3,
            Priority::High => 4,
            Priority::Urgent => 5,
        }
    }
}

/// A push notification about one task.
#[derive(Debug, Clone)]
pub struct Notification {
    pub task_id: Uuid,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    /// Deep link into the operator UI for this task.
    pub action_url: String,
}

impl Notification {
    /// Build the notification for a task, with title/priority keyed off the
    /// event kind.
    pub fn for_task(task_id: Uuid, kind: EventKind, web_domain: &str) -> Notification {
        let action_url = format!("http://{web_domain}/task/{task_id}");
        let mut tags = vec!["tollgate".to_string()];

        let (title, message, priority, tag) = match kind {
            EventKind::PreToolUse => (
                "🔧 Tollgate — Tool approval",
                "The agent needs permission to run a tool",
                Priority::High,
                Some("tool-approval"),
            ),
            EventKind::Notification => (
                "⚠️ Tollgate — Attention required",
                "The agent needs your attention",
                Priority::High,
                Some("attention"),
            ),
            EventKind::UserPromptSubmit => (
                "📝 Tollgate — Prompt submitted",
                "A new prompt is waiting for validation",
                Priority::Normal,
                Some("prompt"),
            ),
            EventKind::PostToolUse => (
                "✅ Tollgate — Tool completed",
                "Tool execution completed",
                Priority::Low,
                Some("completed"),
            ),
            EventKind::Stop => (
                "🏁 Tollgate — Session complete",
                "The agent session has finished",
                Priority::Low,
                Some("finished"),
            ),
            EventKind::SubagentStop => (
                "🤖 Tollgate — Subagent complete",
                "A subagent has finished",
                Priority::Low,
                Some("subagent"),
            ),
            EventKind::PreCompact => (
                "🗜️ Tollgate — Compacting",
                "The agent is compacting its context",
                Priority::Normal,
                None,
            ),
        };
        if let Some(tag) = tag {
            tags.push(tag.to_string());
        }

        Notification {
            task_id,
            title: title.to_string(),
            message: message.to_string(),
            priority,
            tags,
            action_url,
        }
    }
}

/// Seam between the coordinator and whatever delivers pushes. Lets tests
/// record sends instead of hitting the network.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Connection settings for the upstream ntfy server.
#[derive(Debug, Clone)]
pub struct NtfyConfig {
    pub server_url: String,
    pub topic: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// ntfy push adapter.
pub struct NtfyNotifier {
    config: NtfyConfig,
    client: Client,
}

impl NtfyNotifier {
    pub fn new(config: NtfyConfig) -> NtfyNotifier {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        NtfyNotifier { config, client }
    }

    /// Startup health probe. Informational only — a dead ntfy server must
    /// not keep the gateway from serving hooks.
    pub async fn verify(&self) -> anyhow::Result<()> {
        let url = format!(
            "{}/v1/health",
            self.config.server_url.trim_end_matches('/')
        );
        let resp = self.with_auth(self.client.get(&url)).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("ntfy health check returned {}", resp.status());
        }
        Ok(())
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.config.token {
            req.bearer_auth(token)
        } else if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            req.basic_auth(user, Some(pass))
        } else {
            req
        }
    }
}

#[async_trait]
impl NotificationSender for NtfyNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let payload = json!({
            "topic": self.config.topic,
            "title": notification.title,
            "message": notification.message,
            "priority": notification.priority.as_ntfy(),
            "tags": notification.tags,
            "click": notification.action_url,
            "actions": [{
                "action": "view",
                "label": "Open Task",
                "url": notification.action_url,
            }],
        });

        let resp = self
            .with_auth(self.client.post(&self.config.server_url))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("ntfy server returned {status}");
        }
        Ok(())
    }
}
