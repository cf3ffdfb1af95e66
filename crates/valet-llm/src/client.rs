// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for OpenAI-compatible chat-completions endpoints.
//!
//! Provides [`ChatClient`], which handles request construction,
//! authentication, streaming SSE responses, error classification into the
//! workspace taxonomy, and a fallback model chain with exponential backoff
//! for transient failures.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use tracing::{debug, info, warn};
use valet_core::traits::model::{CompletionOutcome, CompletionRequest, DeltaCallback};
use valet_core::types::{TokenUsage, ToolCall};
use valet_core::ValetError;

use crate::types::{
    ApiErrorResponse, ChatChunk, ChatRequest, ChatResponse, StreamOptions, TranscriptionResponse,
    WireMessage, WireTool, from_wire_calls, to_wire,
};

/// Retries per model for transient failures, before moving down the
/// fallback chain.
const TRANSIENT_RETRIES: u32 = 2;

/// Base delay for exponential backoff between transient retries.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// HTTP client for an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    fallback_models: Vec<String>,
    vision_model: String,
    transcription_model: String,
}

impl ChatClient {
    /// Creates a new client.
    ///
    /// `base_url` is the API root (e.g. `https://api.openai.com/v1`);
    /// trailing slashes are stripped.
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, ValetError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {api_key}");
        headers.insert(
            "authorization",
            HeaderValue::from_str(&auth)
                .map_err(|e| ValetError::Config(format!("invalid API key header value: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ValetError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: model.to_string(),
            fallback_models: Vec::new(),
            vision_model: model.to_string(),
            transcription_model: "whisper-1".to_string(),
        })
    }

    /// Sets the models tried in order after the primary fails transiently.
    pub fn with_fallback_models(mut self, models: Vec<String>) -> Self {
        self.fallback_models = models;
        self
    }

    /// Sets the model used for image description.
    pub fn with_vision_model(mut self, model: String) -> Self {
        self.vision_model = model;
        self
    }

    /// Sets the model used for audio transcription.
    pub fn with_transcription_model(mut self, model: String) -> Self {
        self.transcription_model = model;
        self
    }

    /// Returns the default model identifier.
    pub fn default_model_name(&self) -> &str {
        &self.default_model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// The model chain for one request: override or default, then fallbacks.
    fn model_chain(&self, override_model: Option<&str>) -> Vec<String> {
        let primary = override_model
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model)
            .to_string();
        let mut chain = vec![primary.clone()];
        for m in &self.fallback_models {
            if *m != primary {
                chain.push(m.clone());
            }
        }
        chain
    }

    /// Sends one non-streaming request for a specific model.
    async fn complete_once(&self, request: &ChatRequest) -> Result<ChatResponse, ValetError> {
        let response = self
            .client
            .post(self.endpoint("/chat/completions"))
            .json(request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        debug!(status = %status, model = %request.model, "completion response received");

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &body, retry_after));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ValetError::LlmTransient {
                message: format!("failed to read response body: {e}"),
                retry_after: None,
            })?;
        serde_json::from_str(&body)
            .map_err(|e| ValetError::LlmFatal(format!("failed to parse API response: {e}")))
    }

    /// Walks the model chain with exponential backoff on transient errors.
    ///
    /// Context-overflow and fatal errors propagate immediately; the agent
    /// loop handles overflow with its own compaction strategy.
    async fn complete_with_fallback(
        &self,
        models: &[String],
        messages: Vec<WireMessage>,
        tools: Option<Vec<WireTool>>,
    ) -> Result<(ChatResponse, String), ValetError> {
        let mut last_err = None;

        for (model_idx, model) in models.iter().enumerate() {
            let request = ChatRequest {
                model: model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                stream: None,
                stream_options: None,
            };

            for attempt in 0..=TRANSIENT_RETRIES {
                if attempt > 0 {
                    let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                    warn!(model = %model, attempt, delay_s = delay.as_secs(), "retrying after transient error");
                    tokio::time::sleep(delay).await;
                }

                match self.complete_once(&request).await {
                    Ok(resp) => {
                        if model_idx > 0 {
                            info!(model = %model, "fallback model served the request");
                        }
                        return Ok((resp, model.clone()));
                    }
                    Err(err @ ValetError::LlmTransient { .. }) => {
                        last_err = Some(err);
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ValetError::LlmFatal("no models configured for completion".into())
        }))
    }

    /// Non-streaming completion returning the workspace outcome type.
    pub async fn complete_request(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionOutcome, ValetError> {
        let models = self.model_chain(request.model.as_deref());
        let messages: Vec<WireMessage> = request.messages.iter().map(to_wire).collect();
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(WireTool::from).collect())
        };

        let (resp, model_used) = self.complete_with_fallback(&models, messages, tools).await?;

        let choice = resp
            .choices
            .first()
            .ok_or_else(|| ValetError::LlmFatal("no choices in completion response".into()))?;

        let content = choice
            .message
            .content
            .clone()
            .unwrap_or_default()
            .trim()
            .to_string();
        let tool_calls = choice
            .message
            .tool_calls
            .as_ref()
            .map(|c| from_wire_calls(c))
            .unwrap_or_default();
        let usage = resp
            .usage
            .as_ref()
            .map(TokenUsage::from)
            .unwrap_or_default();

        info!(
            model = %model_used,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            tool_calls = tool_calls.len(),
            "chat completion done"
        );

        Ok(CompletionOutcome {
            content,
            tool_calls,
            usage,
            model_used: resp.model.unwrap_or(model_used),
        })
    }

    /// Streaming completion: text deltas go to `on_delta` as they arrive;
    /// tool-call fragments are accumulated silently by index.
    pub async fn complete_request_stream(
        &self,
        request: CompletionRequest,
        on_delta: DeltaCallback,
    ) -> Result<CompletionOutcome, ValetError> {
        let models = self.model_chain(request.model.as_deref());
        let model = models[0].clone();
        let messages: Vec<WireMessage> = request.messages.iter().map(to_wire).collect();
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(WireTool::from).collect())
        };

        let wire_request = ChatRequest {
            model: model.clone(),
            messages,
            tools,
            stream: Some(true),
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };

        let response = self
            .client
            .post(self.endpoint("/chat/completions"))
            .json(&wire_request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &body, retry_after));
        }

        let mut content = String::new();
        let mut usage = TokenUsage::default();
        let mut model_used = model;
        // (id, name, arguments) accumulated per tool-call index.
        let mut pending_calls: Vec<(String, String, String)> = Vec::new();

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ValetError::LlmTransient {
                message: format!("SSE stream error: {e}"),
                retry_after: None,
            })?;

            if event.data.trim() == "[DONE]" {
                break;
            }

            let chunk: ChatChunk = match serde_json::from_str(&event.data) {
                Ok(c) => c,
                // Unknown payloads are skipped; providers add chunk kinds freely.
                Err(_) => continue,
            };

            if let Some(m) = chunk.model {
                model_used = m;
            }
            if let Some(u) = &chunk.usage {
                usage = TokenUsage::from(u);
            }

            for choice in &chunk.choices {
                if let Some(text) = &choice.delta.content
                    && !text.is_empty()
                {
                    content.push_str(text);
                    on_delta(text);
                }

                if let Some(fragments) = &choice.delta.tool_calls {
                    for frag in fragments {
                        while pending_calls.len() <= frag.index {
                            pending_calls.push((String::new(), String::new(), String::new()));
                        }
                        let slot = &mut pending_calls[frag.index];
                        if let Some(id) = &frag.id {
                            slot.0 = id.clone();
                        }
                        if let Some(func) = &frag.function {
                            if let Some(name) = &func.name {
                                slot.1.push_str(name);
                            }
                            if let Some(args) = &func.arguments {
                                slot.2.push_str(args);
                            }
                        }
                    }
                }
            }
        }

        let tool_calls: Vec<ToolCall> = pending_calls
            .into_iter()
            .filter(|(id, name, _)| !id.is_empty() || !name.is_empty())
            .map(|(id, name, arguments)| ToolCall {
                id,
                name,
                arguments,
            })
            .collect();

        debug!(
            content_len = content.len(),
            tool_calls = tool_calls.len(),
            "stream complete"
        );

        Ok(CompletionOutcome {
            content: content.trim().to_string(),
            tool_calls,
            usage,
            model_used,
        })
    }

    /// Describes an image using the vision model.
    pub async fn describe(
        &self,
        image_b64: &str,
        mime: &str,
        prompt: &str,
        detail: &str,
    ) -> Result<String, ValetError> {
        let data_url = format!("data:{mime};base64,{image_b64}");
        let content = serde_json::json!([
            {"type": "text", "text": prompt},
            {"type": "image_url", "image_url": {"url": data_url, "detail": detail}}
        ]);

        let request = ChatRequest {
            model: self.vision_model.clone(),
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
            }],
            tools: None,
            stream: None,
            stream_options: None,
        };

        let resp = self.complete_once(&request).await?;
        let text = resp
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok(text.trim().to_string())
    }

    /// Transcribes an audio clip via the transcriptions endpoint.
    pub async fn transcribe(
        &self,
        data: &[u8],
        filename: &str,
        model: &str,
    ) -> Result<String, ValetError> {
        let model = if model.is_empty() {
            self.transcription_model.clone()
        } else {
            model.to_string()
        };

        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("model", model)
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint("/audio/transcriptions"))
            .multipart(form)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &body, retry_after));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ValetError::LlmFatal(format!("failed to parse transcription: {e}")))?;
        Ok(parsed.text)
    }
}

/// Maps a reqwest transport error into the taxonomy. Timeouts and
/// connection failures are transient; anything else is fatal.
fn classify_reqwest_error(err: reqwest::Error) -> ValetError {
    if err.is_timeout() || err.is_connect() {
        ValetError::LlmTransient {
            message: format!("HTTP request failed: {err}"),
            retry_after: None,
        }
    } else {
        ValetError::LlmFatal(format!("HTTP request failed: {err}"))
    }
}

/// Classifies a non-2xx API response into the error taxonomy.
fn classify_api_error(
    status: reqwest::StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> ValetError {
    let detail = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| valet_core::types::truncate_str(body, 200));

    let lower = format!("{} {}", detail.to_lowercase(), body.to_lowercase());
    let is_overflow = lower.contains("context_length_exceeded")
        || lower.contains("maximum context length")
        || (status.as_u16() == 400 && lower.contains("tokens"));

    if is_overflow {
        return ValetError::ContextOverflow(detail);
    }

    match status.as_u16() {
        401 | 403 => ValetError::LlmFatal(format!("authentication failed: {detail}")),
        429 => ValetError::LlmTransient {
            message: format!("rate limited: {detail}"),
            retry_after,
        },
        500..=599 => ValetError::LlmTransient {
            message: format!("server error {status}: {detail}"),
            retry_after: None,
        },
        _ => ValetError::LlmFatal(format!("API returned {status}: {detail}")),
    }
}

/// Parses a Retry-After header (delta-seconds form only).
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
