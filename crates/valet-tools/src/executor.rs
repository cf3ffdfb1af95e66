// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool registry and batch executor.
//!
//! Tool calls within one model turn execute concurrently, bounded by a
//! semaphore, each under its own deadline and the run's cancellation token.
//! Every call passes the security guard first and produces exactly one
//! audit line. Panics in handlers are caught and converted to failed
//! results -- a tool can never take the daemon down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use valet_config::model::ToolGuardSettings;
use valet_core::types::{AccessLevel, ToolCall, ToolDefinition, ToolErrorKind, ToolResult};
use valet_core::ValetError;

use crate::guard::ToolGuard;
use crate::skill::Skill;
use crate::tool::{Tool, ToolOutput};

/// Error substrings that the model can usually correct by itself: wrong
/// parameters, missing files, transient hiccups.
const RECOVERABLE_ERROR_PATTERNS: &[&str] = &[
    "required",
    "missing",
    "not found",
    "invalid",
    "parsing",
    "no such file",
    "does not exist",
    "permission denied",
    "timed out",
    "connection refused",
    "empty",
];

/// Returns true when an error message looks self-correctable by the model.
pub fn is_recoverable_error_text(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    RECOVERABLE_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Identity of the message sender driving the current run, used for
/// permission checks and approval routing.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub sender: String,
    pub level: AccessLevel,
    pub session_key: String,
}

impl Default for CallerContext {
    fn default() -> Self {
        Self {
            sender: String::new(),
            level: AccessLevel::User,
            session_key: String::new(),
        }
    }
}

/// Details handed to the confirmation requester.
#[derive(Debug, Clone)]
pub struct ConfirmationContext {
    pub session_key: String,
    pub caller: String,
    pub tool_name: String,
    pub args_summary: String,
}

/// Callback that blocks until the caller approves or denies a tool call.
pub type ConfirmationRequester =
    Arc<dyn Fn(ConfirmationContext) -> BoxFuture<'static, bool> + Send + Sync>;

/// A skill-provided tool whose required level is raised to the skill's own.
struct SkillTool {
    inner: Arc<dyn Tool>,
    skill_level: AccessLevel,
}

#[async_trait::async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.inner.parameters_schema()
    }

    fn required_level(&self) -> AccessLevel {
        self.inner.required_level().max(self.skill_level)
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError> {
        self.inner.invoke(input).await
    }
}

/// Registry and dispatcher for tool calls requested by the model.
pub struct ToolExecutor {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    guard: Arc<ToolGuard>,
    semaphore: Arc<Semaphore>,
    tool_timeout: Duration,
    caller: RwLock<CallerContext>,
    confirmation: RwLock<Option<ConfirmationRequester>>,
}

impl ToolExecutor {
    pub fn new(guard: Arc<ToolGuard>, settings: &ToolGuardSettings) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            guard,
            semaphore: Arc::new(Semaphore::new(settings.max_parallel_tools.max(1))),
            tool_timeout: Duration::from_secs(settings.tool_timeout_seconds.max(1)),
            caller: RwLock::new(CallerContext::default()),
            confirmation: RwLock::new(None),
        }
    }

    /// Registers a tool. A duplicate name overwrites the previous
    /// registration and logs a warning.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let previous = self.tools.write().insert(name.clone(), tool);
        if previous.is_some() {
            warn!(tool = %name, "tool re-registered, previous handler replaced");
        }
    }

    /// Registers every tool of a loaded skill, raising each tool's required
    /// level to the skill's own.
    pub fn register_skill_tools(&self, skill: &dyn Skill) {
        let level = skill.metadata().required_level;
        for tool in skill.tools() {
            self.register(Arc::new(SkillTool {
                inner: tool,
                skill_level: level,
            }));
        }
    }

    /// Tool declarations for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.read().values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Names of all registered tools, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Sets the sender identity for subsequent permission checks.
    pub fn set_caller_context(&self, sender: &str, level: AccessLevel) {
        let mut caller = self.caller.write();
        caller.sender = sender.to_string();
        caller.level = level;
    }

    /// Sets the session key used for approval routing.
    pub fn set_session_context(&self, session_key: &str) {
        self.caller.write().session_key = session_key.to_string();
    }

    /// Installs the blocking confirmation callback.
    pub fn set_confirmation_requester(&self, requester: ConfirmationRequester) {
        *self.confirmation.write() = Some(requester);
    }

    /// Executes a batch of tool calls concurrently (bounded by the
    /// semaphore) and returns results in call order.
    pub async fn execute(
        self: &Arc<Self>,
        calls: Vec<ToolCall>,
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let mut handles = Vec::with_capacity(calls.len());

        for call in calls {
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = this.semaphore.acquire().await;
                this.execute_one(call, &cancel).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    // Handler panicked; the call id is lost with the task, so
                    // report a generic failure the model can see.
                    warn!(error = %join_err, "tool task panicked");
                    results.push(ToolResult {
                        call_id: String::new(),
                        name: String::new(),
                        content: "tool handler panicked".to_string(),
                        error: Some(ToolErrorKind::Failed),
                    });
                }
            }
        }
        results
    }

    async fn execute_one(&self, call: ToolCall, cancel: &CancellationToken) -> ToolResult {
        let caller = self.caller.read().clone();

        let args: serde_json::Value = if call.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    let content = format!("error parsing arguments: {e}");
                    self.guard.audit(
                        &call.name,
                        &caller.sender,
                        caller.level,
                        &serde_json::json!({"raw": call.arguments}),
                        true,
                        &content,
                    );
                    return ToolResult {
                        call_id: call.id,
                        name: call.name,
                        content,
                        error: Some(ToolErrorKind::Recoverable),
                    };
                }
            }
        };

        let Some(tool) = self.tools.read().get(&call.name).cloned() else {
            let content = format!("tool '{}' not found", call.name);
            self.guard
                .audit(&call.name, &caller.sender, caller.level, &args, false, &content);
            return ToolResult {
                call_id: call.id,
                name: call.name,
                content,
                error: Some(ToolErrorKind::Recoverable),
            };
        };

        // Security check.
        let check = self
            .guard
            .check(&call.name, caller.level, tool.required_level(), &args);
        if !check.allowed {
            let reason = check.reason.unwrap_or_else(|| "blocked".to_string());
            self.guard
                .audit(&call.name, &caller.sender, caller.level, &args, false, &reason);
            return ToolResult {
                call_id: call.id,
                name: call.name,
                content: format!("Tool blocked: {reason}"),
                error: Some(ToolErrorKind::Blocked),
            };
        }

        // Blocking confirmation flow.
        if check.requires_confirmation {
            let requester = self.confirmation.read().clone();
            if let Some(requester) = requester {
                let ctx = ConfirmationContext {
                    session_key: caller.session_key.clone(),
                    caller: caller.sender.clone(),
                    tool_name: call.name.clone(),
                    args_summary: summarize_args(&args),
                };
                let approved = requester(ctx).await;
                if !approved {
                    let reason = "denied by user confirmation".to_string();
                    self.guard.audit(
                        &call.name,
                        &caller.sender,
                        caller.level,
                        &args,
                        false,
                        &reason,
                    );
                    return ToolResult {
                        call_id: call.id,
                        name: call.name,
                        content: format!("Tool blocked: {reason}"),
                        error: Some(ToolErrorKind::Blocked),
                    };
                }
            }
        }

        // Invoke under the per-tool deadline and the run's cancel token.
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err((ToolErrorKind::Failed, "run canceled".to_string())),
            invoked = tokio::time::timeout(self.tool_timeout, tool.invoke(args.clone())) => {
                match invoked {
                    Err(_) => Err((
                        ToolErrorKind::Timeout,
                        format!("tool timed out after {}s", self.tool_timeout.as_secs()),
                    )),
                    Ok(Err(e)) => Err(classify_handler_error(&e)),
                    Ok(Ok(output)) => Ok(output),
                }
            }
        };

        let result = match outcome {
            Ok(output) => {
                let error = if output.is_error {
                    if is_recoverable_error_text(&output.content) {
                        Some(ToolErrorKind::Recoverable)
                    } else {
                        Some(ToolErrorKind::Failed)
                    }
                } else {
                    None
                };
                ToolResult {
                    call_id: call.id,
                    name: call.name.clone(),
                    content: output.content,
                    error,
                }
            }
            Err((kind, content)) => ToolResult {
                call_id: call.id,
                name: call.name.clone(),
                content,
                error: Some(kind),
            },
        };

        self.guard.audit(
            &call.name,
            &caller.sender,
            caller.level,
            &args,
            true,
            &result.content,
        );

        debug!(
            tool = %result.name,
            error = ?result.error,
            content_len = result.content.len(),
            "tool call finished"
        );
        result
    }
}

/// Maps a handler error into a result classification.
fn classify_handler_error(err: &ValetError) -> (ToolErrorKind, String) {
    let message = err.to_string();
    match err {
        ValetError::ToolBlocked { .. } | ValetError::Security(_) => {
            (ToolErrorKind::Blocked, message)
        }
        ValetError::ToolRecoverable { .. } => (ToolErrorKind::Recoverable, message),
        _ if is_recoverable_error_text(&message) => (ToolErrorKind::Recoverable, message),
        _ => (ToolErrorKind::Failed, message),
    }
}

/// Short human-readable argument summary for confirmation prompts.
fn summarize_args(args: &serde_json::Value) -> String {
    let Some(map) = args.as_object() else {
        return String::new();
    };
    map.iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => valet_core::types::truncate_str(s, 60),
                other => other.to_string(),
            };
            format!("{k}={v}")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input back"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            })
        }

        async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError> {
            match input["message"].as_str() {
                Some(m) => Ok(ToolOutput::ok(m)),
                None => Ok(ToolOutput::error("message is required")),
            }
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps forever"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn invoke(&self, _input: serde_json::Value) -> Result<ToolOutput, ValetError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::ok("done"))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic"
        }

        fn description(&self) -> &str {
            "Panics"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn invoke(&self, _input: serde_json::Value) -> Result<ToolOutput, ValetError> {
            panic!("handler bug");
        }
    }

    struct CountingTool {
        concurrent: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "count"
        }

        fn description(&self) -> &str {
            "Tracks concurrency"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn invoke(&self, _input: serde_json::Value) -> Result<ToolOutput, ValetError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(ToolOutput::ok("counted"))
        }
    }

    fn executor_with(settings: ToolGuardSettings) -> (TempDir, Arc<ToolExecutor>) {
        let dir = TempDir::new().unwrap();
        let mut settings = settings;
        settings.audit_log = dir.path().join("audit.log").to_string_lossy().into_owned();
        let guard = Arc::new(ToolGuard::new(settings.clone()));
        let executor = Arc::new(ToolExecutor::new(guard, &settings));
        executor.set_caller_context("+1", AccessLevel::Owner);
        executor.set_session_context("test:1");
        (dir, executor)
    }

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: format!("call-{name}"),
            name: name.to_string(),
            arguments: args.to_string(),
        }
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let (_dir, executor) = executor_with(ToolGuardSettings::default());
        executor.register(Arc::new(EchoTool));

        let results = executor
            .execute(
                vec![call("echo", r#"{"message":"hello"}"#)],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "hello");
        assert!(results[0].error.is_none());
        assert_eq!(results[0].call_id, "call-echo");
    }

    #[tokio::test]
    async fn unknown_tool_is_recoverable() {
        let (_dir, executor) = executor_with(ToolGuardSettings::default());
        let results = executor
            .execute(vec![call("nope", "{}")], &CancellationToken::new())
            .await;
        assert_eq!(results[0].error, Some(ToolErrorKind::Recoverable));
        assert!(results[0].content.contains("not found"));
    }

    #[tokio::test]
    async fn malformed_arguments_are_recoverable() {
        let (_dir, executor) = executor_with(ToolGuardSettings::default());
        executor.register(Arc::new(EchoTool));
        let results = executor
            .execute(vec![call("echo", "{not json")], &CancellationToken::new())
            .await;
        assert_eq!(results[0].error, Some(ToolErrorKind::Recoverable));
        assert!(results[0].content.contains("parsing"));
    }

    #[tokio::test]
    async fn guard_block_produces_blocked_result_without_invoking() {
        // echo defaults to user level, so force an owner-only override.
        let mut settings = ToolGuardSettings::default();
        settings.tool_permissions =
            HashMap::from([("echo".to_string(), "owner".to_string())]);
        let (_dir, executor) = executor_with(settings);
        executor.register(Arc::new(EchoTool));
        executor.set_caller_context("+2", AccessLevel::User);

        let results = executor
            .execute(
                vec![call("echo", r#"{"message":"hi"}"#)],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(results[0].error, Some(ToolErrorKind::Blocked));
        assert!(results[0].content.contains("Tool blocked"));
    }

    #[tokio::test]
    async fn timeout_produces_timeout_result() {
        let mut settings = ToolGuardSettings::default();
        settings.tool_timeout_seconds = 1;
        let (_dir, executor) = executor_with(settings);
        executor.register(Arc::new(SlowTool));

        let results = executor
            .execute(vec![call("slow", "{}")], &CancellationToken::new())
            .await;
        assert_eq!(results[0].error, Some(ToolErrorKind::Timeout));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_failed_result() {
        let (_dir, executor) = executor_with(ToolGuardSettings::default());
        executor.register(Arc::new(PanicTool));
        let results = executor
            .execute(vec![call("panic", "{}")], &CancellationToken::new())
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error, Some(ToolErrorKind::Failed));
    }

    #[tokio::test]
    async fn batch_runs_bounded_by_semaphore() {
        let mut settings = ToolGuardSettings::default();
        settings.max_parallel_tools = 2;
        let (_dir, executor) = executor_with(settings);

        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        executor.register(Arc::new(CountingTool {
            concurrent: Arc::clone(&concurrent),
            peak: Arc::clone(&peak),
        }));

        let calls: Vec<ToolCall> = (0..6)
            .map(|i| ToolCall {
                id: format!("c{i}"),
                name: "count".to_string(),
                arguments: "{}".to_string(),
            })
            .collect();
        let results = executor.execute(calls, &CancellationToken::new()).await;

        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak was {}", peak.load(Ordering::SeqCst));
        // Results come back in call order.
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.call_id, format!("c{i}"));
        }
    }

    #[tokio::test]
    async fn cancellation_stops_in_flight_tools() {
        let (_dir, executor) = executor_with(ToolGuardSettings::default());
        executor.register(Arc::new(SlowTool));

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let results = executor.execute(vec![call("slow", "{}")], &cancel).await;
        assert_eq!(results[0].error, Some(ToolErrorKind::Failed));
        assert!(results[0].content.contains("canceled"));
    }

    #[tokio::test]
    async fn confirmation_denial_blocks_tool() {
        let mut settings = ToolGuardSettings::default();
        settings.require_confirmation = vec!["echo".into()];
        let (_dir, executor) = executor_with(settings);
        executor.register(Arc::new(EchoTool));
        executor.set_confirmation_requester(Arc::new(|_ctx| Box::pin(async { false })));

        let results = executor
            .execute(
                vec![call("echo", r#"{"message":"hi"}"#)],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(results[0].error, Some(ToolErrorKind::Blocked));
        assert!(results[0].content.contains("denied"));
    }

    #[tokio::test]
    async fn confirmation_approval_lets_tool_run() {
        let mut settings = ToolGuardSettings::default();
        settings.require_confirmation = vec!["echo".into()];
        let (_dir, executor) = executor_with(settings);
        executor.register(Arc::new(EchoTool));
        executor.set_confirmation_requester(Arc::new(|_ctx| Box::pin(async { true })));

        let results = executor
            .execute(
                vec![call("echo", r#"{"message":"approved"}"#)],
                &CancellationToken::new(),
            )
            .await;
        assert!(results[0].error.is_none());
        assert_eq!(results[0].content, "approved");
    }

    #[tokio::test]
    async fn audit_has_one_line_per_invocation() {
        let (dir, executor) = executor_with(ToolGuardSettings::default());
        executor.register(Arc::new(EchoTool));
        executor
            .execute(
                vec![
                    call("echo", r#"{"message":"one"}"#),
                    call("nope", "{}"),
                ],
                &CancellationToken::new(),
            )
            .await;

        let content = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn recoverable_classification_matches_known_patterns() {
        assert!(is_recoverable_error_text("path is required"));
        assert!(is_recoverable_error_text("No such file or directory"));
        assert!(is_recoverable_error_text("connection refused"));
        assert!(!is_recoverable_error_text("segmentation fault"));
    }

    #[tokio::test]
    async fn skill_tools_inherit_skill_level() {
        use crate::skill::{Skill, SkillMetadata};

        struct AdminSkill;

        #[async_trait]
        impl Skill for AdminSkill {
            fn metadata(&self) -> SkillMetadata {
                SkillMetadata {
                    name: "admin-stuff".into(),
                    description: "Admin-only capability".into(),
                    required_level: AccessLevel::Admin,
                }
            }

            fn tools(&self) -> Vec<Arc<dyn Tool>> {
                vec![Arc::new(EchoTool)]
            }
        }

        let (_dir, executor) = executor_with(ToolGuardSettings::default());
        executor.register_skill_tools(&AdminSkill);
        executor.set_caller_context("+3", AccessLevel::User);

        let results = executor
            .execute(
                vec![call("echo", r#"{"message":"hi"}"#)],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(results[0].error, Some(ToolErrorKind::Blocked));
    }
}
