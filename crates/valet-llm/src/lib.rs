// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible chat-completions client for the Valet assistant daemon.
//!
//! Implements the [`LanguageModel`] contract: completions with tool calling,
//! SSE streaming, vision description, and audio transcription, with failures
//! classified into the workspace error taxonomy.

pub mod client;
pub mod types;

pub use client::ChatClient;

use async_trait::async_trait;
use valet_core::traits::model::{CompletionOutcome, CompletionRequest, DeltaCallback};
use valet_core::{LanguageModel, ValetError};

#[async_trait]
impl LanguageModel for ChatClient {
    fn default_model(&self) -> &str {
        self.default_model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionOutcome, ValetError> {
        self.complete_request(request).await
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
        on_delta: DeltaCallback,
    ) -> Result<CompletionOutcome, ValetError> {
        self.complete_request_stream(request, on_delta).await
    }

    async fn describe_image(
        &self,
        image_b64: &str,
        mime: &str,
        prompt: &str,
        detail: &str,
    ) -> Result<String, ValetError> {
        self.describe(image_b64, mime, prompt, detail).await
    }

    async fn transcribe_audio(
        &self,
        data: &[u8],
        filename: &str,
        model: &str,
    ) -> Result<String, ValetError> {
        self.transcribe(data, filename, model).await
    }
}
