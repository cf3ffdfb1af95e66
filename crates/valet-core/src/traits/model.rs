// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Language-model contract consumed by the agent loop.
//!
//! Implementations must classify their failures into the error taxonomy:
//! [`ValetError::ContextOverflow`] triggers compaction,
//! [`ValetError::LlmTransient`] triggers backoff and the fallback chain,
//! and [`ValetError::LlmFatal`] aborts the run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ValetError;
use crate::types::{ChatMessage, TokenUsage, ToolCall, ToolDefinition};

/// A completion request: the full conversation plus the tools on offer.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model override; `None` uses the client's default.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            messages,
            tools: Vec::new(),
        }
    }
}

/// The model's answer to one completion request.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// Final or intermediate assistant text.
    pub content: String,
    /// Tool invocations the model wants executed. Empty means terminal reply.
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    /// The model that actually served the request (after fallback).
    pub model_used: String,
}

/// Callback receiving streamed text deltas.
pub type DeltaCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Contract for a remote large-language-model endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// The default model identifier used when a request has no override.
    fn default_model(&self) -> &str;

    /// Sends a completion request and returns the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionOutcome, ValetError>;

    /// Like [`complete`](Self::complete) but forwards text deltas to
    /// `on_delta` as they arrive. Tool-call deltas are accumulated silently
    /// and only surface in the returned outcome.
    ///
    /// Default implementation degrades to a single non-streaming call that
    /// delivers the full text as one delta.
    async fn complete_stream(
        &self,
        request: CompletionRequest,
        on_delta: DeltaCallback,
    ) -> Result<CompletionOutcome, ValetError> {
        let outcome = self.complete(request).await?;
        if !outcome.content.is_empty() {
            on_delta(&outcome.content);
        }
        Ok(outcome)
    }

    /// Describes an image for media enrichment.
    async fn describe_image(
        &self,
        image_b64: &str,
        mime: &str,
        prompt: &str,
        detail: &str,
    ) -> Result<String, ValetError>;

    /// Transcribes an audio clip for media enrichment.
    async fn transcribe_audio(
        &self,
        data: &[u8],
        filename: &str,
        model: &str,
    ) -> Result<String, ValetError>;
}
