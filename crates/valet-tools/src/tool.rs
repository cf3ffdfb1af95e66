// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool trait implemented by builtin tools and skill-provided tools.
//!
//! Every tool provides a name, description, JSON Schema for its parameters,
//! and an async `invoke` method. The executor calls `invoke` with the parsed
//! JSON argument object from the model's tool call.

use async_trait::async_trait;
use valet_core::types::{AccessLevel, ToolDefinition};
use valet_core::ValetError;

/// Output from a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// The content returned by the tool (text output, JSON, etc.).
    pub content: String,
    /// Whether the tool invocation resulted in an error.
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Unified trait for all tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's unique name (used for lookup and API serialization).
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's input parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Minimum access level when the guard has no per-tool override.
    fn required_level(&self) -> AccessLevel {
        AccessLevel::User
    }

    /// Invokes the tool with the given JSON input.
    ///
    /// Handlers must observe task cancellation: the executor drops the
    /// invocation future when the run is canceled or the deadline elapses.
    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError>;

    /// The declaration offered to the model and consulted by the guard.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            required_level: self.required_level(),
        }
    }
}
