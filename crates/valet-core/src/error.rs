// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Valet assistant daemon.
//!
//! Every failure inside a run resolves to one of these variants; the pipeline
//! converts them into a single user-visible string and never crashes the
//! process. Each variant carries a stable kind tag (see [`ValetError::kind`])
//! used by the audit log and tests.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across all Valet crates.
#[derive(Debug, Error)]
pub enum ValetError {
    /// Sender is not authorized for this assistant.
    #[error("access denied for {sender}: {reason}")]
    AccessDenied { sender: String, reason: String },

    /// Input guard rejected the message for exceeding the rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Input guard rejected the message (too long, injection heuristics).
    #[error("input rejected: {0}")]
    InputRejected(String),

    /// The tool guard refused a tool call.
    #[error("tool '{tool}' blocked: {reason}")]
    ToolBlocked { tool: String, reason: String },

    /// A tool handler failed in a way the model can correct (bad args,
    /// missing file). Appended to the conversation, not surfaced to the user.
    #[error("tool '{tool}' error: {message}")]
    ToolRecoverable { tool: String, message: String },

    /// A tool handler failed terminally (panic, handler exception).
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// The model endpoint reported the context window was exceeded.
    #[error("context overflow: {0}")]
    ContextOverflow(String),

    /// Transient model-endpoint failure (5xx, timeout, connection reset).
    /// Carries the server's retry-after hint when one was provided.
    #[error("transient LLM error: {message}")]
    LlmTransient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Non-recoverable model-endpoint failure (auth, invalid key, bad model).
    #[error("LLM error: {0}")]
    LlmFatal(String),

    /// The whole agent run exceeded its deadline.
    #[error("run timed out after {0:?}")]
    RunTimeout(Duration),

    /// The run was canceled by the user (`/stop`) or by shutdown.
    #[error("canceled")]
    Canceled,

    /// Channel transport failure (send, receive, media download).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Security policy violation outside the tool guard (SSRF, protected URL).
    #[error("security violation: {0}")]
    Security(String),

    /// Configuration errors (invalid TOML, missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem and persistence failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ValetError {
    /// Stable kind tag for audit lines and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ValetError::AccessDenied { .. } => "access_denied",
            ValetError::RateLimited(_) => "rate_limited",
            ValetError::InputRejected(_) => "input_rejected",
            ValetError::ToolBlocked { .. } => "tool_blocked",
            ValetError::ToolRecoverable { .. } => "tool_recoverable",
            ValetError::ToolFailed { .. } => "tool_failed",
            ValetError::ContextOverflow(_) => "context_overflow",
            ValetError::LlmTransient { .. } => "llm_transient",
            ValetError::LlmFatal(_) => "llm_fatal",
            ValetError::RunTimeout(_) => "run_timeout",
            ValetError::Canceled => "canceled",
            ValetError::Channel { .. } => "channel",
            ValetError::Security(_) => "security",
            ValetError::Config(_) => "config",
            ValetError::Io(_) => "io",
            ValetError::Internal(_) => "internal",
        }
    }

    /// True when the agent loop should answer with compaction instead of
    /// giving up.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, ValetError::ContextOverflow(_))
    }
}
