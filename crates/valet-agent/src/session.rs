// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation sessions and their store.
//!
//! A session holds the ordered history for one chat, token counters, the
//! thinking-level tag, session facts, and active skills. History is
//! append-only except through [`Session::compact_history`]. Every entry is
//! persisted as one JSONL line; pruning an idle session drops only the
//! in-memory object -- the file reloads lazily on the next message.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use valet_core::types::ConversationEntry;

/// Per-session mutable configuration, settable by authorized commands.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Model override for this session. Empty uses the workspace default.
    pub model: String,
    /// Workspace/business context injected into the prompt.
    pub business_context: String,
}

struct SessionState {
    history: Vec<ConversationEntry>,
    tokens_in: u64,
    tokens_out: u64,
    thinking_level: String,
    facts: Vec<String>,
    active_skills: Vec<String>,
    config: SessionConfig,
    last_active: Instant,
}

/// The per-chat conversational state bound to a workspace.
pub struct Session {
    pub id: String,
    pub workspace_id: String,
    state: Mutex<SessionState>,
    persist_path: Option<PathBuf>,
}

impl Session {
    fn new(id: String, workspace_id: String, persist_path: Option<PathBuf>) -> Self {
        let history = persist_path
            .as_ref()
            .map(|p| load_history(p))
            .unwrap_or_default();
        if !history.is_empty() {
            debug!(session = %id, entries = history.len(), "session history reloaded");
        }
        Self {
            id,
            workspace_id,
            state: Mutex::new(SessionState {
                history,
                tokens_in: 0,
                tokens_out: 0,
                thinking_level: String::new(),
                facts: Vec::new(),
                active_skills: Vec::new(),
                config: SessionConfig::default(),
                last_active: Instant::now(),
            }),
            persist_path,
        }
    }

    /// Appends one exchange to the history and persists it.
    pub fn add_message(&self, user: &str, assistant: &str) {
        let entry = ConversationEntry {
            user: user.to_string(),
            assistant: assistant.to_string(),
            tokens_in: 0,
            tokens_out: 0,
            timestamp: Utc::now(),
        };
        {
            let mut state = self.state.lock();
            state.history.push(entry.clone());
            state.last_active = Instant::now();
        }
        self.append_line(&entry);
    }

    /// Adds token usage to the monotone session counters.
    pub fn add_token_usage(&self, tokens_in: u64, tokens_out: u64) {
        let mut state = self.state.lock();
        state.tokens_in += tokens_in;
        state.tokens_out += tokens_out;
    }

    /// Cumulative (input, output) token counts.
    pub fn token_usage(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.tokens_in, state.tokens_out)
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<ConversationEntry> {
        let state = self.state.lock();
        let start = state.history.len().saturating_sub(n);
        state.history[start..].to_vec()
    }

    /// Atomically replaces everything but the most recent `keep_recent`
    /// entries with a single synthetic summary entry, returning the removed
    /// entries. With an empty summary the old entries are simply dropped.
    pub fn compact_history(
        &self,
        summary: &str,
        keep_recent: usize,
    ) -> Vec<ConversationEntry> {
        let removed;
        {
            let mut state = self.state.lock();
            if state.history.len() <= keep_recent {
                return Vec::new();
            }
            let split = state.history.len() - keep_recent;
            let tail = state.history.split_off(split);
            removed = std::mem::take(&mut state.history);

            let mut new_history = Vec::with_capacity(tail.len() + 1);
            if !summary.is_empty() {
                new_history.push(ConversationEntry {
                    user: "[compaction summary]".to_string(),
                    assistant: summary.to_string(),
                    tokens_in: 0,
                    tokens_out: 0,
                    timestamp: Utc::now(),
                });
            }
            new_history.extend(tail);
            state.history = new_history;
            state.last_active = Instant::now();
        }
        self.rewrite_file();
        removed
    }

    pub fn thinking_level(&self) -> String {
        self.state.lock().thinking_level.clone()
    }

    pub fn set_thinking_level(&self, level: &str) {
        self.state.lock().thinking_level = level.to_string();
    }

    pub fn facts(&self) -> Vec<String> {
        self.state.lock().facts.clone()
    }

    pub fn add_fact(&self, fact: &str) {
        self.state.lock().facts.push(fact.to_string());
    }

    pub fn active_skills(&self) -> Vec<String> {
        self.state.lock().active_skills.clone()
    }

    pub fn set_active_skills(&self, skills: Vec<String>) {
        self.state.lock().active_skills = skills;
    }

    pub fn config(&self) -> SessionConfig {
        self.state.lock().config.clone()
    }

    pub fn set_config(&self, config: SessionConfig) {
        self.state.lock().config = config;
    }

    /// Clears history and counters (for `/reset`). The JSONL file is
    /// truncated as well.
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.history.clear();
            state.tokens_in = 0;
            state.tokens_out = 0;
            state.facts.clear();
            state.last_active = Instant::now();
        }
        self.rewrite_file();
    }

    /// Time since the session last saw activity.
    pub fn idle_for(&self) -> Duration {
        self.state.lock().last_active.elapsed()
    }

    fn append_line(&self, entry: &ConversationEntry) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let Ok(line) = serde_json::to_string(entry) else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!(session = %self.id, error = %e, "failed to persist history entry");
                }
            }
            Err(e) => warn!(session = %self.id, error = %e, "failed to open history file"),
        }
    }

    fn rewrite_file(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let history = self.state.lock().history.clone();
        let mut content = String::new();
        for entry in &history {
            if let Ok(line) = serde_json::to_string(entry) {
                content.push_str(&line);
                content.push('\n');
            }
        }
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(path, content) {
            warn!(session = %self.id, error = %e, "failed to rewrite history file");
        }
    }
}

fn load_history(path: &PathBuf) -> Vec<ConversationEntry> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Creates and caches sessions for one workspace.
pub struct SessionStore {
    workspace_id: String,
    dir: Option<PathBuf>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    /// `dir` is where this workspace's session JSONL files live; `None`
    /// disables persistence (tests, ephemeral sessions).
    pub fn new(workspace_id: &str, dir: Option<PathBuf>) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            dir,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches or lazily creates the session for a key, reloading persisted
    /// history when present.
    pub fn get_or_create(&self, session_key: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(session_key) {
            return Arc::clone(session);
        }
        let session = Arc::new(Session::new(
            session_key.to_string(),
            self.workspace_id.clone(),
            self.session_path(session_key),
        ));
        sessions.insert(session_key.to_string(), Arc::clone(&session));
        session
    }

    /// Replaces a session with a fresh one (for `/new`).
    pub fn replace(&self, session_key: &str) -> Arc<Session> {
        let fresh = Arc::new(Session::new(
            session_key.to_string(),
            self.workspace_id.clone(),
            self.session_path(session_key),
        ));
        fresh.clear();
        self.sessions
            .lock()
            .insert(session_key.to_string(), Arc::clone(&fresh));
        fresh
    }

    /// Drops in-memory sessions idle longer than `ttl`. History files stay
    /// on disk and reload lazily. Returns the number pruned.
    pub fn prune_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.idle_for() < ttl);
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(workspace = %self.workspace_id, pruned, "idle sessions pruned");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    fn session_path(&self, session_key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| {
            let sanitized: String = session_key
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
                .collect();
            dir.join(format!("{sanitized}.jsonl"))
        })
    }
}
