//! Hook event model.
//!
//! Agents report lifecycle moments by POSTing JSON to the gateway. The wire
//! payload is discriminated by `hook_event_name`; everything else is
//! kind-specific. Unknown kinds are rejected at the ingress so the rest of
//! the gateway only ever sees the closed set below.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of agent lifecycle events the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Fires after the agent builds tool parameters, before the tool runs.
    PreToolUse,
    /// Fires after a tool completes.
    PostToolUse,
    /// Fires when the agent surfaces a notification to its user.
    Notification,
    /// Fires when the user submits a prompt, before the agent processes it.
    UserPromptSubmit,
    /// Fires when the agent finishes responding.
    Stop,
    /// Fires when a subagent finishes responding.
    SubagentStop,
    /// Fires before the agent compacts its context.
    PreCompact,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::PreToolUse,
        EventKind::PostToolUse,
        EventKind::Notification,
        EventKind::UserPromptSubmit,
        EventKind::Stop,
        EventKind::SubagentStop,
        EventKind::PreCompact,
    ];

    /// The wire name carried in `hook_event_name`.
    pub fn as_wire(&self) -> &'static str {
        match self {
            EventKind::PreToolUse => "PreToolUse",
            EventKind::PostToolUse => "PostToolUse",
            EventKind::Notification => "Notification",
            EventKind::UserPromptSubmit => "UserPromptSubmit",
            EventKind::Stop => "Stop",
            EventKind::SubagentStop => "SubagentStop",
            EventKind::PreCompact => "PreCompact",
        }
    }

    /// The URL path segment used by the webhook routes.
    pub fn as_slug(&self) -> &'static str {
        match self {
            EventKind::PreToolUse => "pre-tool-use",
            EventKind::PostToolUse => "post-tool-use",
            EventKind::Notification => "notification",
            EventKind::UserPromptSubmit => "user-prompt-submit",
            EventKind::Stop => "stop",
            EventKind::SubagentStop => "subagent-stop",
            EventKind::PreCompact => "pre-compact",
        }
    }

    /// Parse the wire form (`"PreToolUse"`). Unknown names are `None`.
    pub fn from_wire(s: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|k| k.as_wire() == s.trim())
    }

    /// Parse the URL slug form (`"pre-tool-use"`). Unknown slugs are `None`.
    pub fn from_slug(s: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|k| k.as_slug() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::from_wire(s)
            .or_else(|| EventKind::from_slug(s))
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// Error returned when a string names no known event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind(pub String);

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown hook event kind: {}", self.0)
    }
}

impl std::error::Error for UnknownEventKind {}

/// Tool parameters attached to tool-use events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Tool execution results attached to `PostToolUse` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default, rename = "isImage")]
    pub is_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// What triggered a context compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactTrigger {
    Manual,
    Auto,
}

/// One agent hook invocation, as received on the wire.
///
/// Fields that don't apply to a kind are absent, never null-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookEvent {
    PreToolUse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_input: Option<ToolInput>,
    },
    PostToolUse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_input: Option<ToolInput>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_response: Option<ToolResponse>,
    },
    Notification {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    UserPromptSubmit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    Stop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_path: Option<String>,
    },
    SubagentStop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subagent_id: Option<String>,
    },
    PreCompact {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trigger: Option<CompactTrigger>,
    },
}

impl HookEvent {
    /// An event of the given kind with every field absent.
    ///
    /// Agents sometimes forward empty stdin; the ingress maps an empty body
    /// to this, keyed by the URL slug.
    pub fn empty(kind: EventKind) -> HookEvent {
        match kind {
            EventKind::PreToolUse => HookEvent::PreToolUse {
                session_id: None,
                cwd: None,
                transcript_path: None,
                tool_name: None,
                tool_input: None,
            },
            EventKind::PostToolUse => HookEvent::PostToolUse {
                session_id: None,
                cwd: None,
                transcript_path: None,
                tool_name: None,
                tool_input: None,
                tool_response: None,
            },
            EventKind::Notification => HookEvent::Notification {
                session_id: None,
                cwd: None,
                transcript_path: None,
                message: None,
            },
            EventKind::UserPromptSubmit => HookEvent::UserPromptSubmit {
                session_id: None,
                cwd: None,
                transcript_path: None,
                prompt: None,
            },
            EventKind::Stop => HookEvent::Stop {
                session_id: None,
                cwd: None,
                transcript_path: None,
            },
            EventKind::SubagentStop => HookEvent::SubagentStop {
                session_id: None,
                cwd: None,
                transcript_path: None,
                subagent_id: None,
            },
            EventKind::PreCompact => HookEvent::PreCompact {
                session_id: None,
                cwd: None,
                transcript_path: None,
                trigger: None,
            },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            HookEvent::PreToolUse { .. } => EventKind::PreToolUse,
            HookEvent::PostToolUse { .. } => EventKind::PostToolUse,
            HookEvent::Notification { .. } => EventKind::Notification,
            HookEvent::UserPromptSubmit { .. } => EventKind::UserPromptSubmit,
            HookEvent::Stop { .. } => EventKind::Stop,
            HookEvent::SubagentStop { .. } => EventKind::SubagentStop,
            HookEvent::PreCompact { .. } => EventKind::PreCompact,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            HookEvent::PreToolUse { session_id, .. }
            | HookEvent::PostToolUse { session_id, .. }
            | HookEvent::Notification { session_id, .. }
            | HookEvent::UserPromptSubmit { session_id, .. }
            | HookEvent::Stop { session_id, .. }
            | HookEvent::SubagentStop { session_id, .. }
            | HookEvent::PreCompact { session_id, .. } => session_id.as_deref(),
        }
    }

    pub fn cwd(&self) -> Option<&str> {
        match self {
            HookEvent::PreToolUse { cwd, .. }
            | HookEvent::PostToolUse { cwd, .. }
            | HookEvent::Notification { cwd, .. }
            | HookEvent::UserPromptSubmit { cwd, .. }
            | HookEvent::Stop { cwd, .. }
            | HookEvent::SubagentStop { cwd, .. }
            | HookEvent::PreCompact { cwd, .. } => cwd.as_deref(),
        }
    }

    pub fn transcript_path(&self) -> Option<&str> {
        match self {
            HookEvent::PreToolUse {
                transcript_path, ..
            }
            | HookEvent::PostToolUse {
                transcript_path, ..
            }
            | HookEvent::Notification {
                transcript_path, ..
            }
            | HookEvent::UserPromptSubmit {
                transcript_path, ..
            }
            | HookEvent::Stop {
                transcript_path, ..
            }
            | HookEvent::SubagentStop {
                transcript_path, ..
            }
            | HookEvent::PreCompact {
                transcript_path, ..
            } => transcript_path.as_deref(),
        }
    }

    /// Tool name, for the tool-use kinds.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            HookEvent::PreToolUse { tool_name, .. }
            | HookEvent::PostToolUse { tool_name, .. } => tool_name.as_deref(),
            _ => None,
        }
    }

    /// Tool command string, for the tool-use kinds.
    pub fn tool_command(&self) -> Option<&str> {
        match self {
            HookEvent::PreToolUse { tool_input, .. }
            | HookEvent::PostToolUse { tool_input, .. } => {
                tool_input.as_ref().and_then(|ti| ti.command.as_deref())
            }
            _ => None,
        }
    }
}
