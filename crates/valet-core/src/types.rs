// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the Valet workspace: channel messages, the
//! chat wire form used during a run, tool calls, access levels, and token
//! usage accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Kind of media attached to an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

/// Descriptor for media attached to an incoming message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub filename: Option<String>,
    pub size: u64,
}

/// A message received from a channel transport. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Channel the message arrived on (e.g. "telegram", "whatsapp").
    pub channel: String,
    /// Chat (conversation) identifier within the channel.
    pub chat_id: String,
    /// Opaque sender identifier.
    pub sender: String,
    /// Opaque message identifier, used as reply-to on the way out.
    pub id: String,
    /// Text content. May be empty when media is attached.
    pub content: String,
    /// Attached media, if any.
    pub media: Option<MediaRef>,
    /// True for group chats (trigger keyword required).
    pub is_group: bool,
    /// Arrival timestamp.
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    /// Session key for this message: `channel:chat_id`.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// A reply on its way out to a channel. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub content: String,
    /// Message id this reply responds to, when the channel supports it.
    pub reply_to: Option<String>,
}

/// Access level of a sender. Totally ordered: `Blocked < User < Admin < Owner`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Blocked,
    User,
    Admin,
    Owner,
}

/// Default decision for senders not present in any access list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    /// Silently ignore unknown senders.
    Deny,
    /// Treat unknown senders as regular users.
    Allow,
    /// Reply once with a pending-access notice, then ignore.
    Ask,
}

/// Role of a chat message in the model wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, echoed back in the matching tool result message.
    pub id: String,
    /// Tool name, case-sensitive.
    pub name: String,
    /// Raw JSON argument object as produced by the model.
    pub arguments: String,
}

/// Classification of a tool failure, carried alongside the result text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ToolErrorKind {
    /// Refused by the security guard.
    Blocked,
    /// The model can likely correct this itself (bad args, missing file).
    Recoverable,
    /// Handler exception or panic.
    Failed,
    /// The per-tool deadline elapsed.
    Timeout,
}

/// The outcome of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Identifier of the originating call.
    pub call_id: String,
    pub name: String,
    /// Result text, or the error message when `error` is set.
    pub content: String,
    pub error: Option<ToolErrorKind>,
}

/// A message in the conversation sent to the model during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool invocations requested by the assistant (assistant role only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Identifier linking a tool-role message back to its call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Declaration of a tool made available to the model and to the guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Stable, case-sensitive identifier.
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's argument object.
    pub parameters: serde_json::Value,
    /// Minimum access level required when no guard override exists.
    #[serde(default = "default_required_level")]
    pub required_level: AccessLevel,
}

fn default_required_level() -> AccessLevel {
    AccessLevel::User
}

/// Token usage reported by the model endpoint, accumulated across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Adds another usage report into this accumulator.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One user/assistant exchange in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub user: String,
    pub assistant: String,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    pub timestamp: DateTime<Utc>,
}

/// Truncates a string to `n` bytes on a char boundary, appending "..." when cut.
pub fn truncate_str(s: &str, n: usize) -> String {
    if s.len() <= n {
        return s.to_string();
    }
    let mut end = n;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
