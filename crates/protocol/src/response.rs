//! Agent-facing response model.
//!
//! The agent interprets exactly three fields; the gateway never adds more.
//! `continue = false` blocks the agent and `stopReason` is shown verbatim to
//! its user.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::Decision;

/// The JSON body every webhook route returns to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResponse {
    /// `false` blocks the agent's action.
    #[serde(rename = "continue")]
    pub continue_: bool,

    /// Shown to the agent user when `continue` is false. Empty otherwise.
    #[serde(rename = "stopReason")]
    pub stop_reason: String,

    /// Hides the hook's stdout in the agent UI.
    #[serde(rename = "suppressOutput")]
    pub suppress_output: bool,
}

impl HookResponse {
    /// Operator approved the action.
    pub fn approved() -> HookResponse {
        HookResponse {
            continue_: true,
            stop_reason: String::new(),
            suppress_output: false,
        }
    }

    /// Operator blocked the action with a reason.
    pub fn rejected(reason: impl Into<String>) -> HookResponse {
        HookResponse {
            continue_: false,
            stop_reason: reason.into(),
            suppress_output: false,
        }
    }

    /// No decision arrived inside the window.
    pub fn timeout(window: Duration) -> HookResponse {
        HookResponse {
            continue_: false,
            stop_reason: format!("User decision timeout after {}", format_duration(window)),
            suppress_output: false,
        }
    }

    /// Immediate continue, stdout visible.
    pub fn proceed() -> HookResponse {
        HookResponse {
            continue_: true,
            stop_reason: String::new(),
            suppress_output: false,
        }
    }

    /// Immediate continue with stdout hidden, for a quieter agent UI.
    pub fn suppressed() -> HookResponse {
        HookResponse {
            continue_: true,
            stop_reason: String::new(),
            suppress_output: true,
        }
    }

    /// Translate an operator decision into the agent's response shape.
    ///
    /// Total over [`Decision`]: anything that isn't an explicit block maps
    /// to an approval.
    pub fn from_decision(decision: Decision) -> HookResponse {
        match decision {
            Decision::Approve | Decision::Continue => HookResponse::approved(),
            Decision::Reject => HookResponse::rejected("User rejected this action"),
            Decision::Cancel => HookResponse::rejected("User cancelled this action"),
        }
    }

    /// True when this response blocks the agent.
    pub fn is_blocking(&self) -> bool {
        !self.continue_
    }
}

/// Render a duration the way the decision-timeout reason expects it:
/// `"30s"`, `"1m30s"`, `"5m0s"`, `"1h0m0s"`.
fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
