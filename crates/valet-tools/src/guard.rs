// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Security guard deciding which tools may run, for whom, and with what
//! arguments.
//!
//! Checks, in order: auto-approve bypass, per-tool permission level, shell
//! command safety (sudo, reboot keywords, destructive patterns), SSH host
//! allowlist, protected filesystem paths. Every invocation -- accepted or
//! rejected -- is appended to the audit log.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tracing::{info, warn};
use valet_config::model::ToolGuardSettings;
use valet_core::types::AccessLevel;

/// Commands blocked by default. The reboot family is handled separately by
/// the `allow_reboot` gate.
const DEFAULT_DANGEROUS_PATTERNS: &[&str] = &[
    r"\brm\s+(-[a-zA-Z]*f[a-zA-Z]*\s+)?/",  // rm -rf /
    r"\bmkfs\b",                            // format filesystem
    r"\bdd\s+.*of=/dev/",                   // dd to device
    r">\s*/dev/sd",                         // overwrite device
    r"\bchmod\s+(-R\s+)?777\s+/",           // chmod 777 /
    r"\bchown\s+(-R\s+)?.*\s+/",            // chown / recursively
    r":\(\)\{\s*:\|:&\s*\};:",              // fork bomb
    r"\biptables\s+-F",                     // flush firewall
    r"\bufw\s+disable",                     // disable firewall
    r"\bpasswd\b",                          // change password
    r"\buserdel\b",                         // delete user
    r"\bgroupdel\b",                        // delete group
    r"DROP\s+DATABASE",                     // drop database (SQL)
    r"DROP\s+TABLE",                        // drop table
    r"TRUNCATE\s+TABLE",                    // truncate table
];

const REBOOT_KEYWORDS: &[&str] = &["shutdown", "reboot", "poweroff", "halt"];

/// Result of a guard check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Set when the tool must go through the chat confirmation flow.
    pub requires_confirmation: bool,
}

impl CheckResult {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            requires_confirmation: false,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            requires_confirmation: false,
        }
    }
}

struct DangerousPattern {
    regex: Regex,
    builtin: bool,
}

struct GuardState {
    settings: ToolGuardSettings,
    dangerous: Vec<DangerousPattern>,
    protected_paths: Vec<String>,
}

/// Enforces security policy on tool execution.
pub struct ToolGuard {
    state: RwLock<GuardState>,
    audit_file: Mutex<Option<File>>,
}

impl ToolGuard {
    /// Creates and initializes the guard, compiling patterns and opening the
    /// audit log.
    pub fn new(settings: ToolGuardSettings) -> Self {
        let dangerous = compile_patterns(&settings.dangerous_commands);
        let protected_paths = init_protected_paths(&settings.protected_paths);
        let audit_file = open_audit_file(&settings.audit_log);

        info!(
            enabled = settings.enabled,
            audit_log = %settings.audit_log,
            ssh_hosts = settings.ssh_allowed_hosts.len(),
            allow_sudo = settings.allow_sudo,
            "tool guard initialized"
        );

        Self {
            state: RwLock::new(GuardState {
                settings,
                dangerous,
                protected_paths,
            }),
            audit_file: Mutex::new(audit_file),
        }
    }

    /// Applies a hot-reloaded config: recompiles patterns, refreshes the
    /// protected paths, and reopens the audit log.
    pub fn update_settings(&self, settings: ToolGuardSettings) {
        let mut state = self.state.write();
        state.dangerous = compile_patterns(&settings.dangerous_commands);
        state.protected_paths = init_protected_paths(&settings.protected_paths);
        *self.audit_file.lock() = open_audit_file(&settings.audit_log);
        info!(
            enabled = settings.enabled,
            ssh_hosts = settings.ssh_allowed_hosts.len(),
            "tool guard config hot-reloaded"
        );
        state.settings = settings;
    }

    /// Seconds to wait for `/approve` before treating a request as denied.
    pub fn confirmation_timeout_seconds(&self) -> u64 {
        self.state.read().settings.confirmation_timeout_seconds
    }

    /// Evaluates whether a tool call is permitted for the given access level.
    ///
    /// `default_level` is the tool's own declared requirement, used when the
    /// config carries no per-tool override.
    pub fn check(
        &self,
        tool_name: &str,
        caller_level: AccessLevel,
        default_level: AccessLevel,
        args: &serde_json::Value,
    ) -> CheckResult {
        let state = self.state.read();
        let cfg = &state.settings;

        if !cfg.enabled {
            return CheckResult::allow();
        }

        // 0. Auto-approve bypasses all checks.
        if cfg.auto_approve.iter().any(|n| n == tool_name) {
            return CheckResult::allow();
        }

        let requires_confirmation = cfg.require_confirmation.iter().any(|n| n == tool_name);

        // 1. Tool-level permission.
        let required = required_level(cfg, tool_name, default_level);
        if caller_level < required {
            return CheckResult::deny(format!(
                "tool '{tool_name}' requires {required} access (you have {caller_level})"
            ));
        }

        // 2. Shell command safety.
        if tool_name == "bash" || tool_name == "exec" {
            let command = args["command"].as_str().unwrap_or_default();
            let result = check_command_safety(&state, command, caller_level);
            if !result.allowed {
                return result;
            }
        }

        // 3. SSH host allowlist.
        if tool_name == "ssh" || tool_name == "scp" {
            let mut host = args["host"].as_str().unwrap_or_default().to_string();
            if host.is_empty() {
                // For scp, extract the host from source or destination.
                host = extract_ssh_host(args["source"].as_str().unwrap_or_default())
                    .or_else(|| {
                        extract_ssh_host(args["destination"].as_str().unwrap_or_default())
                    })
                    .unwrap_or_default();
            }
            let result = check_ssh_host(cfg, &host);
            if !result.allowed {
                return result;
            }
        }

        // 4. Protected filesystem paths.
        if tool_name == "read_file" || tool_name == "write_file" || tool_name == "edit_file" {
            let path = args["path"].as_str().unwrap_or_default();
            let result = check_path_safety(&state, path, caller_level, tool_name);
            if !result.allowed {
                return result;
            }
        }

        CheckResult {
            allowed: true,
            reason: None,
            requires_confirmation,
        }
    }

    /// Records a non-tool security event (e.g. a denied sender) to the
    /// same audit log.
    pub fn audit_event(&self, event: &str, subject: &str, detail: &str) {
        let entry = format!(
            "[{}] event={} subject={} detail={}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            event,
            subject,
            valet_core::types::truncate_str(detail, 200),
        );
        info!(entry = %entry, "security event");
        let mut file = self.audit_file.lock();
        if let Some(f) = file.as_mut()
            && let Err(e) = writeln!(f, "{entry}")
        {
            warn!(error = %e, "failed to write audit entry");
        }
    }

    /// Records one tool invocation to the audit log. Exactly one line is
    /// written per `execute` invocation, accepted or rejected.
    pub fn audit(
        &self,
        tool_name: &str,
        caller: &str,
        caller_level: AccessLevel,
        args: &serde_json::Value,
        allowed: bool,
        result: &str,
    ) {
        let mut entry = format!(
            "[{}] tool={} caller={} level={} allowed={}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            tool_name,
            caller,
            caller_level,
            allowed,
        );

        entry.push_str(&format!(" args={}", sanitize_args(args)));

        if !allowed {
            entry.push_str(&format!(" result=BLOCKED:{result}"));
        } else {
            entry.push_str(&format!(
                " result={}",
                valet_core::types::truncate_str(result, 100)
            ));
        }

        info!(entry = %entry, "tool execution");

        let mut file = self.audit_file.lock();
        if let Some(f) = file.as_mut()
            && let Err(e) = writeln!(f, "{entry}")
        {
            warn!(error = %e, "failed to write audit entry");
        }
    }
}

/// Resolves the required level for a tool: config override, then the
/// built-in defaults, then the tool's own declaration.
fn required_level(
    cfg: &ToolGuardSettings,
    tool_name: &str,
    default_level: AccessLevel,
) -> AccessLevel {
    if let Some(s) = cfg.tool_permissions.get(tool_name)
        && let Ok(level) = s.parse::<AccessLevel>()
    {
        return level;
    }
    if let Some(level) = builtin_permissions().get(tool_name) {
        return *level;
    }
    default_level
}

/// Default permission levels for the builtin tool set.
fn builtin_permissions() -> &'static HashMap<&'static str, AccessLevel> {
    use std::sync::OnceLock;
    static MAP: OnceLock<HashMap<&'static str, AccessLevel>> = OnceLock::new();
    MAP.get_or_init(|| {
        HashMap::from([
            // System tools with machine access.
            ("bash", AccessLevel::Owner),
            ("ssh", AccessLevel::Owner),
            ("scp", AccessLevel::Owner),
            ("exec", AccessLevel::Admin),
            // File tools.
            ("write_file", AccessLevel::Admin),
            ("edit_file", AccessLevel::Admin),
            ("read_file", AccessLevel::User),
            ("list_files", AccessLevel::User),
            // Memory.
            ("memory_save", AccessLevel::User),
            ("memory_search", AccessLevel::User),
            // Web.
            ("web_fetch", AccessLevel::User),
        ])
    })
}

fn check_command_safety(
    state: &GuardState,
    command: &str,
    caller_level: AccessLevel,
) -> CheckResult {
    if command.is_empty() {
        return CheckResult::allow();
    }
    let cfg = &state.settings;

    // Sudo gate.
    let is_sudo = command.starts_with("sudo") || command.contains("sudo ");
    if is_sudo {
        if !cfg.allow_sudo {
            return CheckResult::deny("sudo commands are disabled in config (allow_sudo: false)");
        }
        if caller_level < AccessLevel::Admin {
            return CheckResult::deny("sudo commands require at least admin access");
        }
    }

    // Reboot/shutdown gate.
    for kw in REBOOT_KEYWORDS {
        if command.contains(kw) {
            if !cfg.allow_reboot {
                return CheckResult::deny(format!(
                    "'{kw}' is blocked (allow_reboot: false in config)"
                ));
            }
            if caller_level != AccessLevel::Owner {
                return CheckResult::deny(format!("'{kw}' requires owner access"));
            }
        }
    }

    // Destructive command patterns.
    for pat in &state.dangerous {
        if pat.regex.is_match(command) {
            if pat.builtin && cfg.allow_destructive && caller_level == AccessLevel::Owner {
                warn!(command, pattern = pat.regex.as_str(), "destructive command allowed via config");
                continue;
            }
            let label = if pat.builtin {
                "default safety rule"
            } else {
                "safety rule"
            };
            return CheckResult::deny(format!(
                "command blocked by {label}: {} (set allow_destructive: true to override)",
                pat.regex.as_str()
            ));
        }
    }

    CheckResult::allow()
}

fn check_ssh_host(cfg: &ToolGuardSettings, host: &str) -> CheckResult {
    if cfg.ssh_allowed_hosts.is_empty() {
        // No allowlist = all hosts allowed.
        return CheckResult::allow();
    }

    // Strip user@.
    let host = host.rsplit('@').next().unwrap_or(host);

    for allowed in &cfg.ssh_allowed_hosts {
        if allowed == "*" {
            return CheckResult::allow();
        }
        // Wildcard subdomains: *.example.com matches sub.example.com and example.com.
        if let Some(bare) = allowed.strip_prefix("*.") {
            let suffix = &allowed[1..];
            if host.ends_with(suffix) || host == bare {
                return CheckResult::allow();
            }
        }
        if host == allowed {
            return CheckResult::allow();
        }
    }

    CheckResult::deny(format!(
        "SSH host '{host}' not in allowed list. Configure security.tool_guard.ssh_allowed_hosts."
    ))
}

fn check_path_safety(
    state: &GuardState,
    path: &str,
    caller_level: AccessLevel,
    tool_name: &str,
) -> CheckResult {
    if path.is_empty() {
        return CheckResult::allow();
    }

    // Owner has no path restrictions.
    if caller_level == AccessLevel::Owner {
        return CheckResult::allow();
    }

    let abs_path = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        std::env::current_dir()
            .map(|d| d.join(path))
            .unwrap_or_else(|_| PathBuf::from(path))
    };
    let abs = abs_path.to_string_lossy();

    for protected in &state.protected_paths {
        let under = abs == *protected || abs.starts_with(&format!("{protected}/"));
        if under {
            // Admin may read under protected paths but not write.
            if tool_name == "read_file" && caller_level == AccessLevel::Admin {
                continue;
            }
            return CheckResult::deny(format!(
                "path '{path}' is protected and requires owner access"
            ));
        }

        if protected.contains('*')
            && let Ok(pattern) = glob::Pattern::new(protected)
            && pattern.matches(&abs)
        {
            return CheckResult::deny(format!(
                "path '{path}' matches protected pattern '{protected}'"
            ));
        }
    }

    CheckResult::allow()
}

fn compile_patterns(custom: &[String]) -> Vec<DangerousPattern> {
    let mut patterns = Vec::new();

    for p in DEFAULT_DANGEROUS_PATTERNS {
        match Regex::new(&format!("(?i){p}")) {
            Ok(regex) => patterns.push(DangerousPattern {
                regex,
                builtin: true,
            }),
            Err(e) => warn!(pattern = p, error = %e, "invalid default dangerous pattern"),
        }
    }

    for p in custom {
        match Regex::new(&format!("(?i){p}")) {
            Ok(regex) => patterns.push(DangerousPattern {
                regex,
                builtin: false,
            }),
            Err(e) => warn!(pattern = %p, error = %e, "invalid custom dangerous pattern"),
        }
    }

    patterns
}

fn init_protected_paths(configured: &[String]) -> Vec<String> {
    if !configured.is_empty() {
        return configured.to_vec();
    }

    let home = dirs::home_dir().unwrap_or_default();
    let h = |p: &str| home.join(p).to_string_lossy().into_owned();

    vec![
        // SSH keys and config.
        h(".ssh"),
        // GPG keys.
        h(".gnupg"),
        // Local secrets.
        ".env".to_string(),
        // System sensitive paths.
        "/etc/shadow".to_string(),
        "/etc/sudoers".to_string(),
        "/etc/ssl/private".to_string(),
        // Cloud credentials.
        h(".aws/credentials"),
        h(".config/gcloud"),
        h(".kube/config"),
        h(".docker/config.json"),
        // Browser data.
        h(".mozilla"),
        h(".config/google-chrome"),
    ]
}

fn open_audit_file(path: &str) -> Option<File> {
    if path.is_empty() {
        return None;
    }
    if let Some(parent) = Path::new(path).parent()
        && fs::create_dir_all(parent).is_err()
    {
        return None;
    }

    let mut options = OpenOptions::new();
    options.append(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(path) {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(path, error = %e, "cannot open audit log");
            None
        }
    }
}

/// Sanitizes args for logging: string values longer than 200 chars are
/// truncated.
fn sanitize_args(args: &serde_json::Value) -> String {
    match args {
        serde_json::Value::Object(map) => {
            let sanitized: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        serde_json::Value::String(s) if s.len() > 200 => {
                            serde_json::Value::String(format!(
                                "{}...[truncated]",
                                valet_core::types::truncate_str(s, 200)
                            ))
                        }
                        other => other.clone(),
                    };
                    (k.clone(), v)
                })
                .collect();
            serde_json::Value::Object(sanitized).to_string()
        }
        other => other.to_string(),
    }
}

fn extract_ssh_host(s: &str) -> Option<String> {
    let idx = s.find(':')?;
    if idx == 0 {
        return None;
    }
    Some(s[..idx].to_string())
}
