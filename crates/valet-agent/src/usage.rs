// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session token usage aggregation, reported by `/status`.

use std::collections::HashMap;

use parking_lot::Mutex;
use valet_core::types::TokenUsage;

/// Aggregated usage for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionUsage {
    pub requests: u64,
    pub usage: TokenUsage,
    pub last_model: String,
}

/// Records token usage per session.
#[derive(Default)]
pub struct UsageTracker {
    sessions: Mutex<HashMap<String, SessionUsage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, session_key: &str, model: &str, usage: &TokenUsage) {
        let mut sessions = self.sessions.lock();
        let entry = sessions.entry(session_key.to_string()).or_default();
        entry.requests += 1;
        entry.usage.accumulate(usage);
        entry.last_model = model.to_string();
    }

    pub fn session(&self, session_key: &str) -> Option<SessionUsage> {
        self.sessions.lock().get(session_key).cloned()
    }

    /// Totals across all sessions.
    pub fn totals(&self) -> TokenUsage {
        let sessions = self.sessions.lock();
        let mut total = TokenUsage::default();
        for entry in sessions.values() {
            total.accumulate(&entry.usage);
        }
        total
    }
}
