// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The pipeline orchestrator.
//!
//! Message flow: receive -> access check -> command check -> queue admission
//! -> workspace resolve -> trigger check -> media enrichment -> input guard
//! -> prompt composition -> agent run -> output guard -> session update and
//! compaction -> chunked reply.
//!
//! The assistant owns every subsystem for the process lifetime. Cycles
//! (queue drain callback, tool confirmation requester) are broken by
//! injecting closures after construction in [`Assistant::start`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use valet_config::ValetConfig;
use valet_core::traits::model::CompletionRequest;
use valet_core::types::{ChatMessage, IncomingMessage, OutgoingMessage};
use valet_core::{LanguageModel, MemoryStore, ValetError};
use valet_security::{InputGuard, OutputGuard};
use valet_tools::builtin::register_builtin_tools;
use valet_tools::{ApprovalManager, ConfirmationContext, SkillRegistry, ToolExecutor, ToolGuard};

use crate::access::AccessManager;
use crate::channels::ChannelManager;
use crate::commands::{self, Command};
use crate::composer::{ComposerSettings, PromptComposer};
use crate::media::MediaEnricher;
use crate::queue::MessageQueue;
use crate::runner::{AgentRun, RunnerConfig};
use crate::sender::{format_for_channel, split_message};
use crate::session::Session;
use crate::usage::UsageTracker;
use crate::workspace::{Workspace, WorkspaceManager};

/// Reply produced when a run is canceled via `/stop`.
pub const AGENT_STOPPED_REPLY: &str = "Agent stopped.";

/// Fallback reply when the output guard rejects the agent's response.
const OUTPUT_FALLBACK: &str =
    "Sorry, I encountered an issue generating the response. Could you rephrase?";

/// Heartbeat replies equal to this sentinel are suppressed.
pub const HEARTBEAT_SENTINEL: &str = "HEARTBEAT_OK";

/// Handle to an in-flight agent run.
struct RunHandle {
    cancel: CancellationToken,
    interrupt_tx: mpsc::UnboundedSender<String>,
}

/// Clears the session's processing flag when the pipeline exits, on every
/// path including panics and task cancellation.
struct ProcessingGuard {
    queue: Arc<MessageQueue>,
    session_key: String,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.queue.set_processing(&self.session_key, false);
    }
}

/// The daemon's orchestrator: owns all subsystems and drives the pipeline.
pub struct Assistant {
    config: RwLock<ValetConfig>,
    channels: Arc<ChannelManager>,
    access: Arc<AccessManager>,
    workspaces: Arc<WorkspaceManager>,
    model: Arc<dyn LanguageModel>,
    executor: Arc<ToolExecutor>,
    guard: Arc<ToolGuard>,
    approvals: Arc<ApprovalManager>,
    skills: Arc<SkillRegistry>,
    composer: Arc<PromptComposer>,
    input_guard: InputGuard,
    output_guard: OutputGuard,
    memory: Option<Arc<dyn MemoryStore>>,
    enricher: MediaEnricher,
    queue: Arc<MessageQueue>,
    usage: Arc<UsageTracker>,
    active_runs: Mutex<HashMap<String, RunHandle>>,
    cancel: CancellationToken,
}

impl Assistant {
    /// Builds the assistant and all owned subsystems. `cancel` is the root
    /// shutdown token; cancelling it stops the message loop, background
    /// tasks, and all in-flight runs.
    pub fn new(
        config: ValetConfig,
        model: Arc<dyn LanguageModel>,
        memory: Option<Arc<dyn MemoryStore>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let data_dir = PathBuf::from(&config.memory.path);

        let guard = Arc::new(ToolGuard::new(config.security.tool_guard.clone()));
        let executor = Arc::new(ToolExecutor::new(
            Arc::clone(&guard),
            &config.security.tool_guard,
        ));
        register_builtin_tools(
            &executor,
            memory.clone(),
            config.security.ssrf_allowed_ips.clone(),
        );

        let access = Arc::new(AccessManager::new(
            &config.access,
            Some(data_dir.join("access_state.yaml")),
        ));
        let workspaces = Arc::new(WorkspaceManager::new(
            &config.workspaces,
            Some(data_dir.clone()),
        ));

        let composer = Arc::new(PromptComposer::new(ComposerSettings {
            assistant_name: config.agent.name.clone(),
            instructions: config.agent.instructions.clone(),
            timezone: config.agent.timezone.clone(),
            language: config.agent.language.clone(),
            model: config.agent.model.clone(),
            token_budget: config.agent.token_budget,
            bootstrap_dirs: vec![data_dir.clone(), PathBuf::from(".")],
            max_history: config.memory.max_messages.min(20),
        }));
        if let Some(store) = &memory {
            composer.set_memory_store(Arc::clone(store));
        }

        let skills = Arc::new(SkillRegistry::new());
        {
            let registry = Arc::clone(&skills);
            composer.set_skill_prompt_getter(Arc::new(move |name: &str| {
                registry.get(name).map(|s| s.system_prompt())
            }));
        }

        let enricher = MediaEnricher::new(
            Arc::clone(&model),
            config.media.clone(),
            config.api.transcription_model.clone(),
        );

        let queue = Arc::new(MessageQueue::new(
            config.queue.debounce_ms,
            config.queue.max_pending,
        ));

        let input_guard = InputGuard::new(&config.security);

        Arc::new(Self {
            config: RwLock::new(config),
            channels: Arc::new(ChannelManager::new()),
            access,
            workspaces,
            model,
            executor,
            guard,
            approvals: Arc::new(ApprovalManager::new()),
            skills,
            composer,
            input_guard,
            output_guard: OutputGuard::new(),
            memory,
            enricher,
            queue,
            usage: Arc::new(UsageTracker::new()),
            active_runs: Mutex::new(HashMap::new()),
            cancel,
        })
    }

    /// Wires the cross-subsystem callbacks, starts the channels, background
    /// tasks, and the message loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), ValetError> {
        {
            let config = self.config.read();
            info!(
                name = %config.agent.name,
                model = %config.agent.model,
                access_policy = %config.access.policy,
                workspaces = self.workspaces.count(),
                "starting assistant"
            );
        }

        // Queue drain -> pipeline re-entry.
        {
            let assistant = Arc::clone(self);
            self.queue.set_on_drain(Arc::new(move |session_key, msgs| {
                let assistant = Arc::clone(&assistant);
                tokio::spawn(async move {
                    assistant.handle_drained(&session_key, msgs).await;
                });
            }));
        }

        // Tool confirmation -> chat approval flow.
        {
            let approvals = Arc::clone(&self.approvals);
            let channels = Arc::clone(&self.channels);
            let guard = Arc::clone(&self.guard);
            self.executor
                .set_confirmation_requester(Arc::new(move |ctx: ConfirmationContext| {
                    let approvals = Arc::clone(&approvals);
                    let channels = Arc::clone(&channels);
                    let timeout = Duration::from_secs(guard.confirmation_timeout_seconds());
                    Box::pin(async move {
                        let send_channels = Arc::clone(&channels);
                        let session_key = ctx.session_key.clone();
                        let send_msg = move |text: String| {
                            let Some((channel, chat)) = session_key.split_once(':') else {
                                return;
                            };
                            let channels = Arc::clone(&send_channels);
                            let channel = channel.to_string();
                            let chat = chat.to_string();
                            tokio::spawn(async move {
                                let _ = channels
                                    .send(
                                        &channel,
                                        &chat,
                                        OutgoingMessage {
                                            content: text,
                                            reply_to: None,
                                        },
                                    )
                                    .await;
                            });
                        };
                        approvals
                            .request(
                                &ctx.session_key,
                                &ctx.caller,
                                &ctx.tool_name,
                                &ctx.args_summary,
                                send_msg,
                                timeout,
                            )
                            .await
                    })
                }));
        }

        // Register tools from loaded skills.
        for meta in self.skills.list() {
            if let Some(skill) = self.skills.get(&meta.name) {
                if let Err(e) = skill.init().await {
                    warn!(skill = %meta.name, error = %e, "skill init failed");
                    continue;
                }
                self.executor.register_skill_tools(skill.as_ref());
            }
        }

        self.channels.start(self.cancel.child_token()).await?;

        let ttl_minutes = self.config.read().agent.session_ttl_minutes;
        self.workspaces.start_pruner(
            Duration::from_secs(ttl_minutes.max(1) * 60),
            self.cancel.child_token(),
        );

        if self.config.read().heartbeat.enabled {
            crate::heartbeat::spawn_heartbeat(Arc::clone(self), self.cancel.child_token());
        }

        // Main message loop.
        {
            let assistant = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    let msg = tokio::select! {
                        _ = assistant.cancel.cancelled() => return,
                        msg = assistant.channels.next_message() => msg,
                    };
                    let Some(msg) = msg else { return };
                    let assistant = Arc::clone(&assistant);
                    tokio::spawn(async move {
                        assistant.handle_message(msg).await;
                    });
                }
            });
        }

        info!("assistant started");
        Ok(())
    }

    /// Stops background work and shuts skills down.
    pub async fn stop(&self) {
        info!("stopping assistant");
        self.cancel.cancel();
        self.skills.shutdown_all().await;
        info!("assistant stopped");
    }

    /// Applies hot-reloadable config changes: instructions, access lists,
    /// tool guard, heartbeat, token budget. Everything else needs a restart.
    pub fn apply_config_update(&self, new_config: &ValetConfig) {
        {
            let mut config = self.config.write();
            config.agent.instructions = new_config.agent.instructions.clone();
            config.agent.token_budget = new_config.agent.token_budget;
            config.access = new_config.access.clone();
            config.security.tool_guard = new_config.security.tool_guard.clone();
            config.heartbeat = new_config.heartbeat.clone();
        }
        self.access.apply_settings(&new_config.access);
        self.guard
            .update_settings(new_config.security.tool_guard.clone());
        self.composer.update_instructions(
            new_config.agent.instructions.clone(),
            new_config.agent.token_budget,
        );
        info!("config hot-reload applied");
    }

    /// The channel manager, for registering transports before `start`.
    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    /// The skill registry, for loading skills before `start`.
    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    /// The tool executor, for registering extra tools.
    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// The usage tracker.
    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// The workspace manager.
    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    /// The message queue (exposed for tests and diagnostics).
    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Current heartbeat interval in minutes (hot-reloadable).
    pub fn heartbeat_interval_minutes(&self) -> u64 {
        self.config.read().heartbeat.interval_minutes
    }

    /// True when a run is active for `workspace:session`.
    pub fn has_active_run(&self, workspace_id: &str, session_key: &str) -> bool {
        self.active_runs
            .lock()
            .contains_key(&run_key(workspace_id, session_key))
    }

    /// Cancels the active run for a session. Returns whether one existed.
    pub fn stop_active_run(&self, workspace_id: &str, session_key: &str) -> bool {
        let handle = self
            .active_runs
            .lock()
            .remove(&run_key(workspace_id, session_key));
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Injects a follow-up message into the active run for a session.
    /// Returns false when no run is active.
    pub fn inject_interrupt(&self, workspace_id: &str, session_key: &str, text: &str) -> bool {
        let runs = self.active_runs.lock();
        match runs.get(&run_key(workspace_id, session_key)) {
            Some(handle) => handle.interrupt_tx.send(text.to_string()).is_ok(),
            None => false,
        }
    }

    async fn handle_drained(&self, session_key: &str, msgs: Vec<IncomingMessage>) {
        if msgs.is_empty() {
            return;
        }
        let combined = MessageQueue::combine_messages(&msgs);
        let mut synthetic = msgs[0].clone();
        synthetic.id = format!("{}-combined", synthetic.id);
        synthetic.content = combined;
        Box::pin(self.handle_message(synthetic)).await;
    }

    /// Processes one message through the full pipeline.
    pub async fn handle_message(&self, msg: IncomingMessage) {
        let start = Instant::now();
        info!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            from = %msg.sender,
            msg_id = %msg.id,
            content_preview = %valet_core::types::truncate_str(&msg.content, 50),
            is_group = msg.is_group,
            "incoming message"
        );

        // ── Access control ──
        let decision = self.access.check(&msg);
        if !decision.allowed {
            if decision.should_ask {
                self.send_reply(&msg, &self.access.pending_message()).await;
                self.access.mark_asked(&msg.sender);
                info!(from = %msg.sender, "access pending, sent request message");
            } else {
                self.guard
                    .audit_event("access_denied", &msg.sender, &decision.reason);
                info!(from = %msg.sender, reason = %decision.reason, "message ignored (access denied)");
            }
            return;
        }
        debug!(level = %decision.level, "access granted");

        // ── Admin commands (always work, before trigger check) ──
        if commands::is_command(&msg.content)
            && let Some(cmd) = commands::parse(&msg.content)
        {
            let response = self.handle_command(&msg, cmd, decision.level).await;
            if !response.is_empty() {
                self.send_reply(&msg, &response).await;
            }
            info!(duration_ms = start.elapsed().as_millis() as u64, "command processed");
            return;
        }

        // ── Queue admission ──
        let session_key = msg.session_key();
        if self.queue.is_processing(&session_key) {
            if self.queue.enqueue(&session_key, msg) {
                info!(session = %session_key, "message enqueued (session busy)");
            }
            return;
        }
        self.queue.set_processing(&session_key, true);
        let _processing = ProcessingGuard {
            queue: Arc::clone(&self.queue),
            session_key: session_key.clone(),
        };

        // ── Workspace resolve ──
        let resolved = self
            .workspaces
            .resolve(&msg.channel, &msg.chat_id, &msg.sender, msg.is_group);
        let workspace = resolved.workspace;
        let session = resolved.session;

        // Workspace overrides flow into the session config snapshot.
        {
            let mut session_cfg = session.config();
            let mut dirty = false;
            if !workspace.instructions.is_empty()
                && session_cfg.business_context != workspace.instructions
            {
                session_cfg.business_context = workspace.instructions.clone();
                dirty = true;
            }
            if session_cfg.model.is_empty() && !workspace.model.is_empty() {
                session_cfg.model = workspace.model.clone();
                dirty = true;
            }
            if dirty {
                session.set_config(session_cfg);
            }
            if session.active_skills().is_empty() && !workspace.skills.is_empty() {
                session.set_active_skills(workspace.skills.clone());
            }
        }

        // ── Trigger check ──
        let trigger = {
            let config = self.config.read();
            if workspace.trigger.is_empty() {
                config.agent.trigger.clone()
            } else {
                workspace.trigger.clone()
            }
        };
        if !matches_trigger(&msg.content, &trigger, msg.is_group) {
            return;
        }

        info!(workspace = %workspace.id, level = %decision.level, "message received, processing");

        // ── Typing indicator and read receipt (best-effort) ──
        self.channels.send_typing(&msg.channel, &msg.chat_id).await;
        self.channels
            .mark_read(&msg.channel, &msg.chat_id, std::slice::from_ref(&msg.id))
            .await;

        // ── Media enrichment ──
        let downloaded = if msg.media.is_some() {
            self.channels.download_media(&msg).await.ok()
        } else {
            None
        };
        let user_content = self.enricher.enrich(&msg, downloaded).await;

        // ── Input guard ──
        if let Err(e) = self.input_guard.validate(&msg.sender, &user_content) {
            warn!(error = %e, "input rejected");
            self.send_reply(&msg, &format!("Sorry, I can't process that: {e}"))
                .await;
            return;
        }

        // ── Caller context for tool permissions and approvals ──
        self.executor.set_caller_context(&msg.sender, decision.level);
        self.executor.set_session_context(&session_key);

        // ── Prompt composition ──
        let prompt = self.composer.compose(&session, &user_content);

        // ── Agent run ──
        let response = self
            .execute_agent(&workspace, &session, &prompt, &user_content, &msg)
            .await;

        // ── Output guard ──
        let response = match self.output_guard.validate(&response) {
            Ok(()) => response,
            Err(e) => {
                warn!(error = %e, "output rejected, applying fallback");
                OUTPUT_FALLBACK.to_string()
            }
        };

        // ── Session update and compaction ──
        session.add_message(&user_content, &response);
        self.maybe_compact_session(&session).await;

        // ── Reply ──
        self.send_reply(&msg, &response).await;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            workspace = %workspace.id,
            "message processed"
        );
    }

    /// Runs the agent loop for one user turn, registering the run so `/stop`
    /// and interrupts can reach it.
    async fn execute_agent(
        &self,
        workspace: &Workspace,
        session: &Arc<Session>,
        system_prompt: &str,
        user_message: &str,
        msg: &IncomingMessage,
    ) -> String {
        let key = run_key(&workspace.id, &session.id);
        let run_cancel = self.cancel.child_token();
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();

        self.active_runs.lock().insert(
            key.clone(),
            RunHandle {
                cancel: run_cancel.clone(),
                interrupt_tx,
            },
        );

        let runner_config = RunnerConfig::from(&self.config.read().runner);
        let mut agent = AgentRun::new(
            Arc::clone(&self.model),
            Arc::clone(&self.executor),
            runner_config,
        );
        agent.set_model_override(&session.config().model);
        agent.set_interrupt_channel(interrupt_rx);
        {
            let usage = Arc::clone(&self.usage);
            let session_key = session.id.clone();
            agent.set_usage_recorder(Arc::new(move |model, u| {
                usage.record(&session_key, model, u);
            }));
        }
        {
            let channels = Arc::clone(&self.channels);
            let channel = msg.channel.clone();
            let chat_id = msg.chat_id.clone();
            agent.set_progress_sender(Arc::new(move |notice: String| {
                let channels = Arc::clone(&channels);
                let channel = channel.clone();
                let chat_id = chat_id.clone();
                tokio::spawn(async move {
                    let _ = channels
                        .send(
                            &channel,
                            &chat_id,
                            OutgoingMessage {
                                content: notice,
                                reply_to: None,
                            },
                        )
                        .await;
                });
            }));
        }

        let history = session.recent_history(20);
        let result = agent
            .run(&run_cancel, system_prompt, &history, user_message)
            .await;

        self.active_runs.lock().remove(&key);

        match result {
            Ok((response, usage)) => {
                session.add_token_usage(usage.prompt_tokens, usage.completion_tokens);
                response
            }
            Err(ValetError::Canceled) => AGENT_STOPPED_REPLY.to_string(),
            Err(e) => {
                error!(error = %e, kind = e.kind(), "agent failed");
                "Sorry, I encountered an error processing that.".to_string()
            }
        }
    }

    /// Executes a parsed chat command and returns the reply text.
    async fn handle_command(
        &self,
        msg: &IncomingMessage,
        cmd: Command,
        level: valet_core::AccessLevel,
    ) -> String {
        if level < cmd.min_level() {
            return format!("This command requires {} access.", cmd.min_level());
        }

        let session_key = msg.session_key();
        match cmd {
            Command::Allow(id) => match self.access.allow(level, &id) {
                Ok(()) => format!("Allowed {id}."),
                Err(e) => format!("Failed: {e}"),
            },
            Command::Block(id) => match self.access.block(level, &id) {
                Ok(()) => format!("Blocked {id}."),
                Err(e) => format!("Failed: {e}"),
            },
            Command::Admin(id) => match self.access.promote_admin(level, &id) {
                Ok(()) => format!("Promoted {id} to admin."),
                Err(e) => format!("Failed: {e}"),
            },
            Command::Users => {
                let state = self.access.snapshot();
                format!(
                    "Owners: {}\nAdmins: {}\nAllowed users: {}\nAllowed groups: {}\nBlocked: {}",
                    join_or_dash(&state.owners),
                    join_or_dash(&state.admins),
                    join_or_dash(&state.allowed_users),
                    join_or_dash(&state.allowed_groups),
                    join_or_dash(&state.blocked),
                )
            }
            Command::Status => {
                let resolved = self
                    .workspaces
                    .resolve(&msg.channel, &msg.chat_id, &msg.sender, msg.is_group);
                let session = resolved.session;
                let (tokens_in, tokens_out) = session.token_usage();
                let usage_line = match self.usage.session(&session.id) {
                    Some(u) => format!(
                        "{} requests, last model {}",
                        u.requests,
                        if u.last_model.is_empty() {
                            "-"
                        } else {
                            u.last_model.as_str()
                        }
                    ),
                    None => "no requests yet".to_string(),
                };
                format!(
                    "Workspace: {}\nSession: {}\nHistory: {} entries\nTokens: {} in / {} out\nUsage: {}",
                    resolved.workspace.id,
                    session.id,
                    session.history_len(),
                    tokens_in,
                    tokens_out,
                    usage_line,
                )
            }
            Command::Help => commands::help_text(),
            Command::WsCreate(id) => match self.workspaces.create(&id) {
                Ok(()) => format!("Workspace '{id}' created."),
                Err(e) => format!("Failed: {e}"),
            },
            Command::WsAssign { workspace, target } => {
                match self.workspaces.assign_member(&workspace, &target) {
                    Ok(()) => format!("Assigned {target} to workspace '{workspace}'."),
                    Err(e) => format!("Failed: {e}"),
                }
            }
            Command::WsList => {
                let lines: Vec<String> = self
                    .workspaces
                    .list()
                    .iter()
                    .map(|w| format!("- {} ({})", w.id, w.name))
                    .collect();
                format!("Workspaces:\n{}", lines.join("\n"))
            }
            Command::WsInfo(id) => {
                let id = id.unwrap_or_else(|| {
                    self.workspaces
                        .resolve(&msg.channel, &msg.chat_id, &msg.sender, msg.is_group)
                        .workspace
                        .id
                        .clone()
                });
                match self.workspaces.get(&id) {
                    Some(ws) => format!(
                        "Workspace: {}\nName: {}\nModel: {}\nTrigger: {}\nSkills: {}\nSessions: {}",
                        ws.id,
                        ws.name,
                        if ws.model.is_empty() {
                            "(default)"
                        } else {
                            ws.model.as_str()
                        },
                        if ws.trigger.is_empty() {
                            "(global)"
                        } else {
                            ws.trigger.as_str()
                        },
                        if ws.skills.is_empty() {
                            "(all)".to_string()
                        } else {
                            ws.skills.join(", ")
                        },
                        ws.sessions.len(),
                    ),
                    None => format!("No workspace '{id}'."),
                }
            }
            Command::GroupAllow(id) => {
                let id = id.unwrap_or_else(|| msg.chat_id.clone());
                match self.access.allow_group(level, &id) {
                    Ok(()) => format!("Group {id} allowed."),
                    Err(e) => format!("Failed: {e}"),
                }
            }
            Command::GroupBlock(id) => {
                let id = id.unwrap_or_else(|| msg.chat_id.clone());
                match self.access.block_group(level, &id) {
                    Ok(()) => format!("Group {id} blocked."),
                    Err(e) => format!("Failed: {e}"),
                }
            }
            Command::Think(level_tag) => {
                let resolved = self
                    .workspaces
                    .resolve(&msg.channel, &msg.chat_id, &msg.sender, msg.is_group);
                resolved.session.set_thinking_level(&level_tag);
                format!("Thinking level set to {level_tag}.")
            }
            Command::Stop => {
                let resolved = self
                    .workspaces
                    .resolve(&msg.channel, &msg.chat_id, &msg.sender, msg.is_group);
                if self.stop_active_run(&resolved.workspace.id, &session_key) {
                    "Stopping the active run.".to_string()
                } else {
                    "No active run for this session.".to_string()
                }
            }
            Command::Compact => {
                let resolved = self
                    .workspaces
                    .resolve(&msg.channel, &msg.chat_id, &msg.sender, msg.is_group);
                let (old_len, new_len) = self.force_compact_session(&resolved.session).await;
                format!("Compacted history: {old_len} -> {new_len} entries.")
            }
            Command::Approve => {
                if self.approvals.resolve(&session_key, true) {
                    "Approved.".to_string()
                } else {
                    "Nothing pending approval.".to_string()
                }
            }
            Command::Deny => {
                if self.approvals.resolve(&session_key, false) {
                    "Denied.".to_string()
                } else {
                    "Nothing pending approval.".to_string()
                }
            }
            Command::New | Command::Reset => {
                let resolved = self
                    .workspaces
                    .resolve(&msg.channel, &msg.chat_id, &msg.sender, msg.is_group);
                resolved.workspace.sessions.replace(&session_key);
                "Started a fresh session.".to_string()
            }
        }
    }

    /// Preventive compaction: triggers at 80% of the configured limit.
    async fn maybe_compact_session(&self, session: &Arc<Session>) {
        let threshold = self.config.read().memory.max_messages.max(1);
        let preventive = (threshold * 80 / 100).max(10);
        let hist_len = session.history_len();
        if hist_len < preventive {
            return;
        }
        info!(
            session = %session.id,
            history_len = hist_len,
            threshold,
            preventive_at = preventive,
            "preventive compaction triggered"
        );
        self.compact_session(session).await;
    }

    /// Immediate compaction for `/compact`. Returns (old, new) lengths.
    pub async fn force_compact_session(&self, session: &Arc<Session>) -> (usize, usize) {
        let old_len = session.history_len();
        if old_len < 5 {
            return (old_len, old_len);
        }
        self.compact_session(session).await;
        (old_len, session.history_len())
    }

    /// Compacts a session using the configured strategy.
    ///
    /// - `summarize` (default): model writes a short summary; old entries go
    ///   to the daily log; recent quarter kept.
    /// - `truncate` / `sliding`: drop oldest, keep half. No model call.
    async fn compact_session(&self, session: &Arc<Session>) {
        let (strategy, threshold) = {
            let config = self.config.read();
            (
                config.memory.compression_strategy.clone(),
                config.memory.max_messages.max(1),
            )
        };
        info!(
            session = %session.id,
            strategy = %strategy,
            history_len = session.history_len(),
            "session compaction"
        );

        match strategy.as_str() {
            "truncate" | "sliding" => {
                let keep = (threshold / 2).max(10);
                let removed = session.compact_history("", keep);
                info!(
                    session = %session.id,
                    entries_removed = removed.len(),
                    new_history_len = session.history_len(),
                    "session compacted"
                );
            }
            _ => self.compact_summarize(session, threshold).await,
        }
    }

    async fn compact_summarize(&self, session: &Arc<Session>, threshold: usize) {
        // Step 1: memory flush -- let the model save important facts via the
        // memory_save tool before old history disappears.
        if self.memory.is_some() {
            let flush_prompt = "Extract the most important facts, preferences, and information \
                 from this conversation that should be remembered long-term. Save them using \
                 the memory_save tool. If nothing important, reply with NO_REPLY.";
            let system_prompt = self.composer.compose(session, flush_prompt);

            let mut flush_config = RunnerConfig::from(&self.config.read().runner);
            flush_config.run_timeout = Duration::from_secs(60);
            let agent = AgentRun::new(
                Arc::clone(&self.model),
                Arc::clone(&self.executor),
                flush_config,
            );
            let flush_cancel = self.cancel.child_token();
            match agent
                .run(
                    &flush_cancel,
                    &system_prompt,
                    &session.recent_history(20),
                    flush_prompt,
                )
                .await
            {
                Ok(_) => info!("memory flush completed before compaction"),
                Err(e) => warn!(error = %e, "memory flush failed"),
            }
        }

        // Step 2: a short conversational summary.
        let summary_prompt = "Summarize the key points of this conversation in 2-3 sentences. \
             Focus on decisions made, tasks completed, and important context.";
        let mut messages = Vec::new();
        for entry in session.recent_history(20) {
            messages.push(ChatMessage::user(&entry.user));
            if !entry.assistant.is_empty() {
                messages.push(ChatMessage::assistant(&entry.assistant));
            }
        }
        messages.push(ChatMessage::user(summary_prompt));
        let summary = match self.model.complete(CompletionRequest::new(messages)).await {
            Ok(outcome) => outcome.content,
            Err(e) => {
                warn!(error = %e, "compaction summary failed, using placeholder");
                "Previous conversation context was compacted.".to_string()
            }
        };

        // Step 3: keep the most recent quarter.
        let keep = (threshold / 4).max(5);
        let removed = session.compact_history(&summary, keep);

        // Step 4: removed entries go to the daily log.
        if let Some(store) = &self.memory
            && !removed.is_empty()
        {
            let log = format!(
                "### Compacted session: {}\n\nSummary: {}\n\nEntries compacted: {}\n",
                session.id,
                summary,
                removed.len()
            );
            let _ = store.save_daily_log(chrono::Utc::now(), &log);
        }

        info!(
            session = %session.id,
            entries_removed = removed.len(),
            new_history_len = session.history_len(),
            "session compacted (summarize)"
        );
    }

    /// Runs one proactive heartbeat turn and delivers non-sentinel output.
    pub async fn run_heartbeat(&self) {
        let (prompt_text, channel, chat_id) = {
            let config = self.config.read();
            if !config.heartbeat.enabled {
                return;
            }
            (
                config.heartbeat.prompt.clone(),
                config.heartbeat.channel.clone(),
                config.heartbeat.chat_id.clone(),
            )
        };

        let workspace = self
            .workspaces
            .get(crate::workspace::DEFAULT_WORKSPACE)
            .expect("default workspace exists");
        let session = workspace.sessions.get_or_create("heartbeat:checks");
        let system_prompt = self.composer.compose(&session, &prompt_text);

        let agent = AgentRun::new(
            Arc::clone(&self.model),
            Arc::clone(&self.executor),
            RunnerConfig::from(&self.config.read().runner),
        );
        let result = agent
            .run(
                &self.cancel.child_token(),
                &system_prompt,
                &session.recent_history(10),
                &prompt_text,
            )
            .await;

        match result {
            Ok((content, _usage)) => {
                session.add_message(&prompt_text, &content);
                let trimmed = content.trim();
                if trimmed.is_empty() || trimmed == HEARTBEAT_SENTINEL {
                    debug!("heartbeat produced no actionable content");
                    return;
                }
                if !channel.is_empty() && !chat_id.is_empty() {
                    let _ = self
                        .channels
                        .send(
                            &channel,
                            &chat_id,
                            OutgoingMessage {
                                content: content.clone(),
                                reply_to: None,
                            },
                        )
                        .await;
                    info!("heartbeat delivered");
                }
            }
            Err(e) => warn!(error = %e, "heartbeat run failed"),
        }
    }

    /// Sends a reply, splitting long content into channel-sized chunks with
    /// the original message id as reply-to.
    async fn send_reply(&self, original: &IncomingMessage, content: &str) {
        let content = format_for_channel(content, &original.channel);
        let max_len = self.channels.max_message_length(&original.channel);

        for chunk in split_message(&content, max_len) {
            if let Err(e) = self
                .channels
                .send(
                    &original.channel,
                    &original.chat_id,
                    OutgoingMessage {
                        content: chunk,
                        reply_to: Some(original.id.clone()),
                    },
                )
                .await
            {
                error!(
                    channel = %original.channel,
                    chat_id = %original.chat_id,
                    error = %e,
                    "failed to send reply chunk"
                );
            }
        }
    }
}

fn run_key(workspace_id: &str, session_key: &str) -> String {
    format!("{workspace_id}:{session_key}")
}

fn join_or_dash(set: &std::collections::BTreeSet<String>) -> String {
    if set.is_empty() {
        "-".to_string()
    } else {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Checks whether a message matches the activation keyword.
///
/// DMs always match; groups require the (case-insensitive) trigger prefix.
fn matches_trigger(content: &str, trigger: &str, is_group: bool) -> bool {
    if trigger.is_empty() || !is_group {
        return true;
    }
    let content = content.trim_start();
    content
        .get(..trigger.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(trigger))
}
