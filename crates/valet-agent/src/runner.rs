// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The agent loop: call the model, execute requested tools, append results,
//! repeat until the model produces a final text response.
//!
//! - No fixed turn limit by default -- the loop runs until the model stops
//!   calling tools.
//! - A single run timeout (default 600s) controls the whole run.
//! - A per-call safety timeout (default 300s) only catches hung connections.
//! - A reflection nudge every 15 turns keeps the model budget-aware.
//! - Context overflow triggers in-run compaction, up to 3 attempts.
//! - Follow-up user messages are injected between turns via the interrupt
//!   channel; cancellation is observed between and during model calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use valet_config::model::RunnerSettings;
use valet_core::traits::model::{CompletionRequest, DeltaCallback};
use valet_core::types::{
    ChatMessage, ConversationEntry, Role, TokenUsage, ToolCall, ToolDefinition, ToolErrorKind,
};
use valet_core::{LanguageModel, ValetError};
use valet_tools::ToolExecutor;

/// Turns between budget-awareness nudges.
const REFLECTION_INTERVAL: u32 = 15;

/// Tool results above this size are truncated on the first overflow retry.
const OVERSIZED_TOOL_RESULT: usize = 4096;

/// Tool-result cap applied together with message compaction.
const COMPACTED_TOOL_RESULT: usize = 2048;

/// Callback recording per-call token usage.
pub type UsageRecorder = Arc<dyn Fn(&str, &TokenUsage) + Send + Sync>;

/// Callback delivering a user-facing progress notice while tools execute.
pub type ProgressSender = Arc<dyn Fn(String) + Send + Sync>;

/// Agent loop deadlines and recovery limits.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub run_timeout: Duration,
    pub llm_call_timeout: Duration,
    /// 0 = unlimited.
    pub max_turns: u32,
    pub reflection_enabled: bool,
    pub max_compaction_attempts: u32,
}

impl From<&RunnerSettings> for RunnerConfig {
    fn from(s: &RunnerSettings) -> Self {
        Self {
            run_timeout: Duration::from_secs(s.run_timeout_seconds.max(1)),
            llm_call_timeout: Duration::from_secs(s.llm_call_timeout_seconds.max(1)),
            max_turns: s.max_turns,
            reflection_enabled: s.reflection_enabled,
            max_compaction_attempts: s.max_compaction_attempts.max(1),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig::from(&RunnerSettings::default())
    }
}

/// A single agent execution with its dependencies.
pub struct AgentRun {
    model: Arc<dyn LanguageModel>,
    executor: Arc<ToolExecutor>,
    config: RunnerConfig,
    model_override: Option<String>,
    stream_callback: Option<DeltaCallback>,
    usage_recorder: Option<UsageRecorder>,
    before_tool_exec: Option<Arc<dyn Fn() + Send + Sync>>,
    progress_sender: Option<ProgressSender>,
    interrupt_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl AgentRun {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        executor: Arc<ToolExecutor>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            model,
            executor,
            config,
            model_override: None,
            stream_callback: None,
            usage_recorder: None,
            before_tool_exec: None,
            progress_sender: None,
            interrupt_rx: Mutex::new(None),
        }
    }

    /// Uses this model instead of the client default. Empty string clears.
    pub fn set_model_override(&mut self, model: &str) {
        self.model_override = if model.is_empty() {
            None
        } else {
            Some(model.to_string())
        };
    }

    /// Forwards text deltas live; tool-call deltas accumulate silently.
    pub fn set_stream_callback(&mut self, cb: DeltaCallback) {
        self.stream_callback = Some(cb);
    }

    /// Invoked after each successful model response.
    pub fn set_usage_recorder(&mut self, recorder: UsageRecorder) {
        self.usage_recorder = Some(recorder);
    }

    /// Invoked right before tool execution starts, so a streaming UX can
    /// flush buffered text first.
    pub fn set_before_tool_exec(&mut self, f: Arc<dyn Fn() + Send + Sync>) {
        self.before_tool_exec = Some(f);
    }

    /// Invoked with a short notice describing the tools about to run.
    pub fn set_progress_sender(&mut self, sender: ProgressSender) {
        self.progress_sender = Some(sender);
    }

    /// Installs the channel for follow-up user messages. Drained between
    /// turns, never mid-call.
    pub fn set_interrupt_channel(&mut self, rx: mpsc::UnboundedReceiver<String>) {
        *self.interrupt_rx.lock() = Some(rx);
    }

    /// Executes the loop and returns the final text plus cumulative usage.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        system_prompt: &str,
        history: &[ConversationEntry],
        user_message: &str,
    ) -> Result<(String, TokenUsage), ValetError> {
        let run_start = Instant::now();
        let mut messages = build_messages(system_prompt, history, user_message);
        let tools = self.executor.definitions();
        let mut total_usage = TokenUsage::default();

        debug!(
            history_entries = history.len(),
            tools_available = tools.len(),
            run_timeout_s = self.config.run_timeout.as_secs(),
            max_turns = self.config.max_turns,
            "agent run started"
        );

        // No tools registered: single completion.
        if tools.is_empty() {
            let resp = self
                .call_with_overflow_retry(cancel, run_start, &messages, &tools)
                .await?;
            total_usage.accumulate(&resp.usage);
            return Ok((resp.content, total_usage));
        }

        let mut total_turns: u32 = 0;
        loop {
            total_turns += 1;
            let turn_start = Instant::now();

            if cancel.is_cancelled() {
                return Err(ValetError::Canceled);
            }
            if run_start.elapsed() >= self.config.run_timeout {
                return Err(ValetError::RunTimeout(self.config.run_timeout));
            }

            // Follow-up messages sent while the agent was working.
            if total_turns > 1 {
                let interrupts = self.drain_interrupts();
                if !interrupts.is_empty() {
                    info!(count = interrupts.len(), turn = total_turns, "injecting follow-up messages");
                    for interrupt in interrupts {
                        messages.push(ChatMessage::user(format!(
                            "[Follow-up from user while processing]\n{interrupt}"
                        )));
                    }
                }
            }

            // Budget awareness nudge.
            if self.config.reflection_enabled
                && total_turns > 1
                && total_turns % REFLECTION_INTERVAL == 0
            {
                let elapsed = run_start.elapsed().as_secs();
                let remaining = self.config.run_timeout.as_secs().saturating_sub(elapsed);
                messages.push(ChatMessage::user(format!(
                    "[System: {total_turns} turns completed, {elapsed}s elapsed, ~{remaining}s remaining. Plan efficiently.]"
                )));
            }

            // Soft turn limit: request a final summary and stop.
            if self.config.max_turns > 0 && total_turns > self.config.max_turns {
                warn!(
                    total_turns,
                    max_turns = self.config.max_turns,
                    "agent reached soft turn limit, requesting summary"
                );
                messages.push(ChatMessage::user(
                    "[System: You have used many turns. Please provide your best response \
                     with the information gathered so far.]",
                ));
                let resp = self
                    .call_with_overflow_retry(cancel, run_start, &messages, &[])
                    .await?;
                total_usage.accumulate(&resp.usage);
                return Ok((resp.content, total_usage));
            }

            // Call the model; a timed-out call deep into the run gets one
            // compact-and-retry before giving up.
            let llm_start = Instant::now();
            let resp = match self
                .call_with_overflow_retry(cancel, run_start, &messages, &tools)
                .await
            {
                Ok(resp) => resp,
                Err(ValetError::Canceled) => return Err(ValetError::Canceled),
                Err(err) => {
                    let timed_out = matches!(&err, ValetError::LlmTransient { message, .. } if message.contains("timed out"));
                    if timed_out && total_turns > 2 && messages.len() > 10 {
                        warn!(
                            turn = total_turns,
                            messages_before = messages.len(),
                            "LLM call timed out, compacting context and retrying"
                        );
                        messages = compact_messages(messages, 12);
                        truncate_tool_results(&mut messages, 1500);
                        self.call_with_overflow_retry(cancel, run_start, &messages, &tools)
                            .await?
                    } else {
                        return Err(err);
                    }
                }
            };
            total_usage.accumulate(&resp.usage);

            info!(
                turn = total_turns,
                llm_ms = llm_start.elapsed().as_millis() as u64,
                tool_calls = resp.tool_calls.len(),
                prompt_tokens = resp.usage.prompt_tokens,
                completion_tokens = resp.usage.completion_tokens,
                "LLM call complete"
            );

            // No tool calls: final response.
            if resp.tool_calls.is_empty() {
                info!(
                    total_turns,
                    response_len = resp.content.len(),
                    run_elapsed_ms = run_start.elapsed().as_millis() as u64,
                    "agent completed"
                );
                return Ok((resp.content, total_usage));
            }

            messages.push(ChatMessage::assistant_with_calls(
                resp.content.clone(),
                resp.tool_calls.clone(),
            ));

            // Flush buffered stream text before tools start.
            if let Some(flush) = &self.before_tool_exec {
                flush();
            }

            // Show the user what is about to run.
            if let Some(progress) = &self.progress_sender {
                let notice = format_tool_progress(&resp.tool_calls);
                if !notice.is_empty() {
                    progress(notice);
                }
            }

            let tool_start = Instant::now();
            let results = self.executor.execute(resp.tool_calls, cancel).await;
            info!(
                count = results.len(),
                tools_ms = tool_start.elapsed().as_millis() as u64,
                turn_ms = turn_start.elapsed().as_millis() as u64,
                "tool calls complete"
            );

            for result in results {
                if result.error == Some(ToolErrorKind::Recoverable) {
                    debug!(
                        tool = %result.name,
                        error_preview = %valet_core::types::truncate_str(&result.content, 80),
                        "recoverable tool error (model should retry)"
                    );
                }
                messages.push(ChatMessage::tool(result.call_id, result.content));
            }
        }
    }

    /// One model call with overflow recovery.
    ///
    /// Strategy: (1) first truncate oversized tool results, (2) then keep
    /// the system message plus the most recent messages, truncating tool
    /// results harder, (3) keep fewer messages on each further attempt.
    /// The working copy is local to this call.
    async fn call_with_overflow_retry(
        &self,
        cancel: &CancellationToken,
        run_start: Instant,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<valet_core::CompletionOutcome, ValetError> {
        let mut working: Vec<ChatMessage> = messages.to_vec();
        let mut tool_results_truncated = false;
        let mut keep_recent: usize = 20;

        for attempt in 0..self.config.max_compaction_attempts {
            let remaining = self
                .config
                .run_timeout
                .checked_sub(run_start.elapsed())
                .ok_or(ValetError::RunTimeout(self.config.run_timeout))?;
            let call_timeout = remaining.min(self.config.llm_call_timeout);

            let request = CompletionRequest {
                model: self.model_override.clone(),
                messages: working.clone(),
                tools: tools.to_vec(),
            };

            let call = async {
                if let Some(cb) = &self.stream_callback {
                    self.model.complete_stream(request, Arc::clone(cb)).await
                } else {
                    self.model.complete(request).await
                }
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ValetError::Canceled),
                res = tokio::time::timeout(call_timeout, call) => match res {
                    Err(_elapsed) => {
                        if run_start.elapsed() >= self.config.run_timeout {
                            Err(ValetError::RunTimeout(self.config.run_timeout))
                        } else {
                            Err(ValetError::LlmTransient {
                                message: format!(
                                    "LLM call timed out after {}s",
                                    call_timeout.as_secs()
                                ),
                                retry_after: None,
                            })
                        }
                    }
                    Ok(r) => r,
                },
            };

            match outcome {
                Ok(resp) => {
                    if let Some(recorder) = &self.usage_recorder
                        && resp.usage.total_tokens > 0
                    {
                        recorder(&resp.model_used, &resp.usage);
                    }
                    return Ok(resp);
                }
                Err(err) if err.is_context_overflow() => {
                    info!(
                        attempt = attempt + 1,
                        max_attempts = self.config.max_compaction_attempts,
                        messages_before = working.len(),
                        "context overflow detected"
                    );

                    // Step 1: truncate oversized tool results (cheap).
                    if !tool_results_truncated
                        && has_oversized_tool_results(&working, OVERSIZED_TOOL_RESULT)
                    {
                        info!("truncating oversized tool results before compaction");
                        truncate_tool_results(&mut working, OVERSIZED_TOOL_RESULT);
                        tool_results_truncated = true;
                        continue;
                    }

                    // Step 2+: keep system + last N and truncate harder.
                    info!(keep_recent, messages_before = working.len(), "compacting messages");
                    working = compact_messages(working, keep_recent);
                    truncate_tool_results(&mut working, COMPACTED_TOOL_RESULT);
                    keep_recent = keep_recent.saturating_sub(5).max(6);
                }
                Err(err) => return Err(err),
            }
        }

        Err(ValetError::ContextOverflow(format!(
            "compacted {} times but still exceeded context limit",
            self.config.max_compaction_attempts
        )))
    }

    /// Reads all pending interrupt messages without blocking.
    fn drain_interrupts(&self) -> Vec<String> {
        let mut guard = self.interrupt_rx.lock();
        let Some(rx) = guard.as_mut() else {
            return Vec::new();
        };
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }
}

/// Converts conversation history into the chat message list for a run.
fn build_messages(
    system_prompt: &str,
    history: &[ConversationEntry],
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    if !system_prompt.is_empty() {
        messages.push(ChatMessage::system(system_prompt));
    }
    for entry in history {
        messages.push(ChatMessage::user(&entry.user));
        if !entry.assistant.is_empty() {
            messages.push(ChatMessage::assistant(&entry.assistant));
        }
    }
    messages.push(ChatMessage::user(user_message));
    messages
}

/// Keeps the system message (when first) plus the last `keep_recent`
/// messages.
fn compact_messages(messages: Vec<ChatMessage>, keep_recent: usize) -> Vec<ChatMessage> {
    if messages.len() <= keep_recent + 1 {
        return messages;
    }

    let has_system = messages.first().map(|m| m.role == Role::System).unwrap_or(false);
    if has_system {
        let mut result = vec![messages[0].clone()];
        let rest = &messages[1..];
        let start = rest.len().saturating_sub(keep_recent);
        result.extend_from_slice(&rest[start..]);
        result
    } else {
        let start = messages.len().saturating_sub(keep_recent);
        messages[start..].to_vec()
    }
}

/// Shortens tool-result messages that exceed `max_len` bytes.
fn truncate_tool_results(messages: &mut [ChatMessage], max_len: usize) {
    const SUFFIX: &str = "... [truncated]";
    let mut keep = 1000usize;
    if keep + SUFFIX.len() > max_len {
        keep = max_len.saturating_sub(SUFFIX.len());
    }

    for msg in messages.iter_mut() {
        if msg.role == Role::Tool && msg.content.len() > max_len {
            let mut end = keep.min(msg.content.len());
            while end > 0 && !msg.content.is_char_boundary(end) {
                end -= 1;
            }
            msg.content = format!("{}{SUFFIX}", &msg.content[..end]);
        }
    }
}

/// True when any tool-result message exceeds `max_len` bytes.
fn has_oversized_tool_results(messages: &[ChatMessage], max_len: usize) -> bool {
    messages
        .iter()
        .any(|m| m.role == Role::Tool && m.content.len() > max_len)
}

/// Short user-facing notice about the tools the agent is about to run.
fn format_tool_progress(calls: &[ToolCall]) -> String {
    if calls.is_empty() {
        return String::new();
    }

    let icon = |name: &str| match name {
        "bash" | "exec" => "🖥️",
        "read_file" => "📄",
        "write_file" | "edit_file" => "✏️",
        "web_fetch" => "🌐",
        "memory_save" => "💾",
        "memory_search" => "🧠",
        "ssh" => "🔗",
        "scp" => "📦",
        "list_files" => "📂",
        _ => "⚙️",
    };

    let mut parts = Vec::with_capacity(calls.len());
    for call in calls {
        let ic = icon(&call.name);
        let args: serde_json::Value =
            serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);

        let desc = match call.name.as_str() {
            "bash" | "exec" => args["command"]
                .as_str()
                .filter(|c| !c.is_empty())
                .map(|c| format!("{ic} `{}`", valet_core::types::truncate_str(c, 50))),
            "web_fetch" => args["url"]
                .as_str()
                .filter(|u| !u.is_empty())
                .map(|u| format!("{ic} {}", valet_core::types::truncate_str(u, 60))),
            "read_file" | "write_file" | "edit_file" => args["path"]
                .as_str()
                .filter(|p| !p.is_empty())
                .map(|p| format!("{ic} {p}")),
            _ => None,
        };
        parts.push(desc.unwrap_or_else(|| format!("{ic} {}", call.name)));
    }

    if parts.len() == 1 {
        format!("⏳ {}", parts[0])
    } else {
        format!("⏳ Executing:\n{}", parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(user: &str, assistant: &str) -> ConversationEntry {
        ConversationEntry {
            user: user.into(),
            assistant: assistant.into(),
            tokens_in: 0,
            tokens_out: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn build_messages_interleaves_history() {
        let history = vec![entry("q1", "a1"), entry("q2", "")];
        let messages = build_messages("sys", &history, "now");
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::User]
        );
        assert_eq!(messages[0].content, "sys");
        assert_eq!(messages.last().unwrap().content, "now");
    }

    #[test]
    fn build_messages_without_system_prompt() {
        let messages = build_messages("", &[], "hello");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn compact_keeps_system_and_tail() {
        let mut messages = vec![ChatMessage::system("sys")];
        for i in 0..30 {
            messages.push(ChatMessage::user(format!("m{i}")));
        }
        let compacted = compact_messages(messages, 5);
        assert_eq!(compacted.len(), 6);
        assert_eq!(compacted[0].role, Role::System);
        assert_eq!(compacted[1].content, "m25");
        assert_eq!(compacted[5].content, "m29");
    }

    #[test]
    fn compact_without_system_keeps_tail_only() {
        let messages: Vec<ChatMessage> =
            (0..10).map(|i| ChatMessage::user(format!("m{i}"))).collect();
        let compacted = compact_messages(messages, 4);
        assert_eq!(compacted.len(), 4);
        assert_eq!(compacted[0].content, "m6");
    }

    #[test]
    fn compact_noop_when_short() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        assert_eq!(compact_messages(messages, 5).len(), 2);
    }

    #[test]
    fn truncate_only_touches_tool_messages() {
        let long = "x".repeat(10_000);
        let mut messages = vec![
            ChatMessage::user(long.clone()),
            ChatMessage::tool("c1", long.clone()),
        ];
        truncate_tool_results(&mut messages, 4096);
        assert_eq!(messages[0].content.len(), 10_000);
        assert!(messages[1].content.len() <= 4096);
        assert!(messages[1].content.ends_with("... [truncated]"));
    }

    #[test]
    fn oversized_detection() {
        let messages = vec![ChatMessage::tool("c1", "x".repeat(5000))];
        assert!(has_oversized_tool_results(&messages, 4096));
        assert!(!has_oversized_tool_results(&messages, 6000));
    }

    #[test]
    fn progress_notice_includes_command_hint() {
        let calls = vec![ToolCall {
            id: "1".into(),
            name: "bash".into(),
            arguments: r#"{"command":"ls -la /tmp"}"#.into(),
        }];
        let notice = format_tool_progress(&calls);
        assert!(notice.contains("ls -la /tmp"));
        assert!(notice.starts_with("⏳"));
    }

    #[test]
    fn progress_notice_lists_multiple_tools() {
        let calls = vec![
            ToolCall {
                id: "1".into(),
                name: "web_fetch".into(),
                arguments: r#"{"url":"https://example.com"}"#.into(),
            },
            ToolCall {
                id: "2".into(),
                name: "memory_search".into(),
                arguments: "{}".into(),
            },
        ];
        let notice = format_tool_progress(&calls);
        assert!(notice.contains("Executing:"));
        assert!(notice.contains("example.com"));
        assert!(notice.contains("memory_search"));
    }
}
