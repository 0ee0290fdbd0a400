//! Tollgate Protocol
//!
//! Shared types for the tollgate approval gateway: the hook events an agent
//! posts, the response shape it expects back, and the task records the
//! operator acts on. Everything here is serialized as JSON on the wire.

pub mod hook;
pub mod response;
pub mod task;

pub use hook::{CompactTrigger, EventKind, HookEvent, ToolInput, ToolResponse, UnknownEventKind};
pub use response::HookResponse;
pub use task::{Decision, Task, TaskFilter, TaskHistoryEntry, TaskStatus};
