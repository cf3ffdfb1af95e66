// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted mock language model for deterministic testing.
//!
//! Turns are popped from a FIFO queue: each is a text reply, a tool-call
//! request, an error, or a hang (for cancellation tests). Every request is
//! recorded so tests can inspect what the agent actually sent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use valet_core::traits::model::{CompletionOutcome, CompletionRequest, DeltaCallback};
use valet_core::types::{TokenUsage, ToolCall};
use valet_core::{LanguageModel, ValetError};

/// One scripted model turn.
pub enum MockTurn {
    /// A terminal text reply.
    Text(String),
    /// A tool-call request (empty content).
    Tools(Vec<ToolCall>),
    /// A context-overflow error.
    ContextOverflow,
    /// A transient server error.
    Transient,
    /// A fatal error.
    Fatal(String),
    /// Never completes until the future is dropped.
    Hang,
}

/// A mock model that replays scripted turns.
pub struct MockModel {
    turns: Mutex<VecDeque<MockTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
    response_delay: Mutex<Option<Duration>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            response_delay: Mutex::new(None),
        }
    }

    pub fn with_turns(turns: Vec<MockTurn>) -> Arc<Self> {
        let model = Self::new();
        *model.turns.lock() = VecDeque::from(turns);
        Arc::new(model)
    }

    /// Convenience: a model that always answers with one text reply.
    pub fn replying(text: &str) -> Arc<Self> {
        Self::with_turns(vec![MockTurn::Text(text.to_string())])
    }

    pub fn push_turn(&self, turn: MockTurn) {
        self.turns.lock().push_back(turn);
    }

    /// Adds an artificial delay before every response.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock() = Some(delay);
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request the agent sent, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
            total_tokens: 30,
        }
    }

    async fn respond(&self, request: CompletionRequest) -> Result<CompletionOutcome, ValetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let delay = *self.response_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let turn = self
            .turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockTurn::Text("mock reply".to_string()));
        let model_used = request
            .model
            .unwrap_or_else(|| "mock-model".to_string());

        match turn {
            MockTurn::Text(text) => Ok(CompletionOutcome {
                content: text,
                tool_calls: Vec::new(),
                usage: Self::usage(),
                model_used,
            }),
            MockTurn::Tools(calls) => Ok(CompletionOutcome {
                content: String::new(),
                tool_calls: calls,
                usage: Self::usage(),
                model_used,
            }),
            MockTurn::ContextOverflow => Err(ValetError::ContextOverflow(
                "maximum context length exceeded".to_string(),
            )),
            MockTurn::Transient => Err(ValetError::LlmTransient {
                message: "server error 503".to_string(),
                retry_after: None,
            }),
            MockTurn::Fatal(msg) => Err(ValetError::LlmFatal(msg)),
            MockTurn::Hang => {
                // Sleep until the caller drops the future (cancel/timeout).
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ValetError::Internal("hang completed unexpectedly".into()))
            }
        }
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionOutcome, ValetError> {
        self.respond(request).await
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
        on_delta: DeltaCallback,
    ) -> Result<CompletionOutcome, ValetError> {
        let outcome = self.respond(request).await?;
        if !outcome.content.is_empty() {
            on_delta(&outcome.content);
        }
        Ok(outcome)
    }

    async fn describe_image(
        &self,
        _image_b64: &str,
        _mime: &str,
        _prompt: &str,
        _detail: &str,
    ) -> Result<String, ValetError> {
        Ok("a mock image description".to_string())
    }

    async fn transcribe_audio(
        &self,
        _data: &[u8],
        _filename: &str,
        _model: &str,
    ) -> Result<String, ValetError> {
        Ok("a mock transcript".to_string())
    }
}
