// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term memory contract consumed by the prompt composer, the
//! compaction engine, and the memory tools.

use chrono::{DateTime, Utc};

use crate::error::ValetError;

/// Persistent long-term memory: a fact index plus daily logs.
pub trait MemoryStore: Send + Sync {
    /// Returns up to `limit` stored facts, best matches for `query` first,
    /// rendered as a newline-separated block. Empty string when nothing
    /// matches.
    fn recent_facts(&self, limit: usize, query: &str) -> String;

    /// Appends a fact under the given kind (e.g. "preference", "person").
    fn save_fact(&self, kind: &str, text: &str) -> Result<(), ValetError>;

    /// Appends text to the daily log for `when`'s date.
    fn save_daily_log(&self, when: DateTime<Utc>, text: &str) -> Result<(), ValetError>;
}
