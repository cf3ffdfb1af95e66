// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Valet assistant daemon.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup. The loaded config is an immutable snapshot; the
//! hot-reloadable sections (instructions, access, tool guard, heartbeat,
//! token budget) are re-applied through `Assistant::apply_config_update`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use valet_core::types::AccessPolicy;

/// Top-level Valet configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ValetConfig {
    /// Assistant identity and behavior.
    #[serde(default)]
    pub agent: AgentSettings,

    /// Model endpoint settings.
    #[serde(default)]
    pub api: ApiSettings,

    /// Sender access control.
    #[serde(default)]
    pub access: AccessSettings,

    /// Isolated workspaces multiplexed over the channels.
    #[serde(default)]
    pub workspaces: Vec<WorkspaceSettings>,

    /// Per-session message queue behavior.
    #[serde(default)]
    pub queue: QueueSettings,

    /// Input/output guardrails and the tool security guard.
    #[serde(default)]
    pub security: SecuritySettings,

    /// Session history and long-term memory.
    #[serde(default)]
    pub memory: MemorySettings,

    /// Agent loop deadlines and recovery.
    #[serde(default)]
    pub runner: RunnerSettings,

    /// Periodic proactive check-ins.
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,

    /// Media enrichment (vision, transcription).
    #[serde(default)]
    pub media: MediaSettings,
}

/// Assistant identity and behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSettings {
    /// Display name, used in the prompt's core layer.
    #[serde(default = "default_name")]
    pub name: String,

    /// Group-chat trigger keyword. Empty means always respond.
    #[serde(default)]
    pub trigger: String,

    /// Default model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Reply language hint, injected in the runtime prompt layer.
    #[serde(default = "default_language")]
    pub language: String,

    /// IANA timezone for the temporal prompt layer.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Custom system instructions (hot-reloadable).
    #[serde(default)]
    pub instructions: String,

    /// System-prompt token budget for layer trimming (hot-reloadable).
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Minutes of inactivity before an idle session is pruned.
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: u64,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            trigger: String::new(),
            model: default_model(),
            language: default_language(),
            timezone: default_timezone(),
            instructions: String::new(),
            token_budget: default_token_budget(),
            session_ttl_minutes: default_session_ttl_minutes(),
            log_level: default_log_level(),
        }
    }
}

fn default_name() -> String {
    "Valet".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_token_budget() -> usize {
    24_000
}

fn default_session_ttl_minutes() -> u64 {
    720
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Model endpoint settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSettings {
    /// Endpoint base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key. `None` requires the `VALET_API_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Models tried in order when the primary fails transiently.
    #[serde(default)]
    pub fallback_models: Vec<String>,

    /// Model used for image description.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Model used for audio transcription.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            fallback_models: Vec::new(),
            vision_model: default_vision_model(),
            transcription_model: default_transcription_model(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

/// Sender access control (hot-reloadable).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AccessSettings {
    /// Decision for senders not present in any list.
    #[serde(default = "default_policy")]
    pub policy: AccessPolicy,

    #[serde(default)]
    pub owners: Vec<String>,

    #[serde(default)]
    pub admins: Vec<String>,

    #[serde(default)]
    pub allowed_users: Vec<String>,

    #[serde(default)]
    pub allowed_groups: Vec<String>,

    /// One-time notice sent under the `ask` policy.
    #[serde(default = "default_pending_message")]
    pub pending_message: String,
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            owners: Vec::new(),
            admins: Vec::new(),
            allowed_users: Vec::new(),
            allowed_groups: Vec::new(),
            pending_message: default_pending_message(),
        }
    }
}

fn default_policy() -> AccessPolicy {
    AccessPolicy::Deny
}

fn default_pending_message() -> String {
    "Your access request is pending approval.".to_string()
}

/// An isolated workspace: its own instructions, model, and routing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSettings {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Workspace-scoped system instructions (business context layer).
    #[serde(default)]
    pub instructions: String,

    /// Model override for sessions routed here.
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub language: String,

    /// Trigger override for group chats routed here.
    #[serde(default)]
    pub trigger: String,

    /// Skill allowlist for this workspace.
    #[serde(default)]
    pub skills: Vec<String>,

    /// Sender ids routed to this workspace.
    #[serde(default)]
    pub members: Vec<String>,

    /// Chat ids routed to this workspace.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Per-session message queue behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSettings {
    /// Debounce delay before a drain, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Max pending messages per session; the oldest is evicted beyond this.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_pending: default_max_pending(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_max_pending() -> usize {
    20
}

/// Input/output guardrails and the tool security guard.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SecuritySettings {
    /// Max input length in characters.
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,

    /// Per-sender sliding-window rate limit.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Scan inputs for prompt-injection heuristics.
    #[serde(default = "default_true")]
    pub injection_scan: bool,

    /// Tool security guard (hot-reloadable).
    #[serde(default)]
    pub tool_guard: ToolGuardSettings,

    /// Private IPs the web-fetch tool may reach despite SSRF protection.
    #[serde(default)]
    pub ssrf_allowed_ips: Vec<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_input_length: default_max_input_length(),
            rate_limit: RateLimitSettings::default(),
            injection_scan: true,
            tool_guard: ToolGuardSettings::default(),
            ssrf_allowed_ips: Vec::new(),
        }
    }
}

fn default_max_input_length() -> usize {
    16_000
}

fn default_true() -> bool {
    true
}

/// Per-sender sliding-window rate limit.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    #[serde(default = "default_rate_max_requests")]
    pub max_requests: usize,

    #[serde(default = "default_rate_window_seconds")]
    pub window_seconds: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_rate_max_requests(),
            window_seconds: default_rate_window_seconds(),
        }
    }
}

fn default_rate_max_requests() -> usize {
    20
}

fn default_rate_window_seconds() -> u64 {
    60
}

/// Tool security guard configuration (hot-reloadable).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToolGuardSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Append-only audit log path (0o600).
    #[serde(default = "default_audit_log")]
    pub audit_log: String,

    /// Per-tool permission overrides: tool name -> "owner"/"admin"/"user".
    #[serde(default)]
    pub tool_permissions: HashMap<String, String>,

    /// Permit destructive shell commands for the owner.
    #[serde(default)]
    pub allow_destructive: bool,

    /// Permit sudo for owner and admin.
    #[serde(default)]
    pub allow_sudo: bool,

    /// Permit shutdown/reboot/poweroff/halt for the owner.
    #[serde(default)]
    pub allow_reboot: bool,

    /// Additional blocked-command regexes, appended after the defaults.
    /// These always block, regardless of `allow_destructive`.
    #[serde(default)]
    pub dangerous_commands: Vec<String>,

    /// Protected filesystem paths. Empty uses the built-in defaults.
    #[serde(default)]
    pub protected_paths: Vec<String>,

    /// SSH/SCP host allowlist. Empty = any host; supports "*" and "*.suffix".
    #[serde(default)]
    pub ssh_allowed_hosts: Vec<String>,

    /// Tools that bypass every check.
    #[serde(default)]
    pub auto_approve: Vec<String>,

    /// Tools that require chat confirmation before executing.
    #[serde(default)]
    pub require_confirmation: Vec<String>,

    /// Seconds to wait for `/approve` before treating the request as denied.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_seconds: u64,

    /// Max tool calls executed concurrently within one batch.
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    /// Default per-tool deadline in seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_seconds: u64,
}

impl Default for ToolGuardSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            audit_log: default_audit_log(),
            tool_permissions: HashMap::new(),
            allow_destructive: false,
            allow_sudo: false,
            allow_reboot: false,
            dangerous_commands: Vec::new(),
            protected_paths: Vec::new(),
            ssh_allowed_hosts: Vec::new(),
            auto_approve: Vec::new(),
            require_confirmation: Vec::new(),
            confirmation_timeout_seconds: default_confirmation_timeout(),
            max_parallel_tools: default_max_parallel_tools(),
            tool_timeout_seconds: default_tool_timeout(),
        }
    }
}

fn default_audit_log() -> String {
    "./data/audit.log".to_string()
}

fn default_confirmation_timeout() -> u64 {
    120
}

fn default_max_parallel_tools() -> usize {
    5
}

fn default_tool_timeout() -> u64 {
    60
}

/// Session history and long-term memory.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemorySettings {
    /// Data directory: session JSONL files and the memory store live here.
    #[serde(default = "default_memory_path")]
    pub path: String,

    /// History length at which compaction triggers (preventively at 80%).
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Compaction strategy: "summarize", "truncate", or "sliding".
    #[serde(default = "default_strategy")]
    pub compression_strategy: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
            max_messages: default_max_messages(),
            compression_strategy: default_strategy(),
        }
    }
}

fn default_memory_path() -> String {
    "./data".to_string()
}

fn default_max_messages() -> usize {
    100
}

fn default_strategy() -> String {
    "summarize".to_string()
}

/// Agent loop deadlines and recovery.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSettings {
    /// Max seconds for an entire agent run. One timer for the whole run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    /// Safety-net timeout per individual LLM call; only catches hung
    /// connections, never the primary limit.
    #[serde(default = "default_llm_call_timeout")]
    pub llm_call_timeout_seconds: u64,

    /// Soft limit on LLM round-trips. 0 = unlimited.
    #[serde(default)]
    pub max_turns: u32,

    /// Periodic elapsed/remaining-budget nudges.
    #[serde(default = "default_true")]
    pub reflection_enabled: bool,

    /// Retries after context overflow before the run fails.
    #[serde(default = "default_max_compaction_attempts")]
    pub max_compaction_attempts: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            run_timeout_seconds: default_run_timeout(),
            llm_call_timeout_seconds: default_llm_call_timeout(),
            max_turns: 0,
            reflection_enabled: true,
            max_compaction_attempts: default_max_compaction_attempts(),
        }
    }
}

fn default_run_timeout() -> u64 {
    600
}

fn default_llm_call_timeout() -> u64 {
    300
}

fn default_max_compaction_attempts() -> u32 {
    3
}

/// Periodic proactive check-ins (hot-reloadable).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_interval")]
    pub interval_minutes: u64,

    /// Prompt run as an ordinary agent turn each interval.
    #[serde(default = "default_heartbeat_prompt")]
    pub prompt: String,

    /// Channel to deliver actionable heartbeat output to.
    #[serde(default)]
    pub channel: String,

    /// Chat to deliver actionable heartbeat output to.
    #[serde(default)]
    pub chat_id: String,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_heartbeat_interval(),
            prompt: default_heartbeat_prompt(),
            channel: String::new(),
            chat_id: String::new(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_heartbeat_prompt() -> String {
    "Review pending reminders and follow-ups. If there is nothing the user needs to know right now, reply with exactly HEARTBEAT_OK.".to_string()
}

/// Media enrichment (vision, transcription).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MediaSettings {
    #[serde(default = "default_true")]
    pub vision_enabled: bool,

    /// Max image size in bytes accepted for description.
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u64,

    /// Vision detail hint: "low", "high", or "auto".
    #[serde(default = "default_vision_detail")]
    pub vision_detail: String,

    #[serde(default = "default_true")]
    pub transcription_enabled: bool,

    /// Max audio size in bytes accepted for transcription.
    #[serde(default = "default_max_audio_size")]
    pub max_audio_size: u64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            vision_enabled: true,
            max_image_size: default_max_image_size(),
            vision_detail: default_vision_detail(),
            transcription_enabled: true,
            max_audio_size: default_max_audio_size(),
        }
    }
}

fn default_max_image_size() -> u64 {
    10 * 1024 * 1024
}

fn default_vision_detail() -> String {
    "auto".to_string()
}

fn default_max_audio_size() -> u64 {
    25 * 1024 * 1024
}
