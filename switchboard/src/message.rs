//! Conversation message types.
//!
//! Roles: System, User, Assistant, plus tool-call/tool-result pairs produced while
//! driving agents. A `ToolCall` and its matching `ToolResult` share a `call_id`;
//! the trimming logic in [`crate::prompt`] never keeps one without the other.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message in a thread's conversation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// System prompt; typically placed first in the message list.
    System { content: String },
    /// User input (the original instruction or a resume answer).
    User { content: String },
    /// Planner/driver reply.
    Assistant { content: String },
    /// A tool invocation issued while executing a step.
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// The result matching a prior `ToolCall` with the same `call_id`.
    ToolResult { call_id: String, content: String },
}

impl Message {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    /// Creates a tool call message.
    pub fn tool_call(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Creates a tool result message.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            content: content.into(),
        }
    }

    /// Text content for roles that carry plain text; tool calls render their arguments.
    pub fn text(&self) -> String {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                content.clone()
            }
            Self::ToolCall {
                name, arguments, ..
            } => format!("{}({})", name, arguments),
            Self::ToolResult { content, .. } => content.clone(),
        }
    }

    /// The `call_id` linking a tool call to its result, if this is either half.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCall { call_id, .. } | Self::ToolResult { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }
}
