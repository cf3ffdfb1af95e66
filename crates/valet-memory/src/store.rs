// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! File-backed long-term memory store.
//!
//! Layout under the store directory:
//! - `facts.jsonl` -- append-only fact index, one JSON object per line.
//! - `daily/YYYY-MM-DD.md` -- daily log markdown, appended to by compaction
//!   and the heartbeat.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use valet_core::{MemoryStore, ValetError};

/// One stored fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fact {
    kind: String,
    text: String,
    saved_at: DateTime<Utc>,
}

/// Long-term memory backed by flat files.
pub struct FileStore {
    dir: PathBuf,
    /// Serializes appends; reads go straight to disk.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ValetError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("daily"))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn facts_path(&self) -> PathBuf {
        self.dir.join("facts.jsonl")
    }

    fn load_facts(&self) -> Vec<Fact> {
        let Ok(content) = fs::read_to_string(self.facts_path()) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Crude relevance score: count of query words appearing in the fact.
    fn score(fact: &Fact, query_words: &[String]) -> usize {
        let haystack = format!("{} {}", fact.kind, fact.text).to_lowercase();
        query_words
            .iter()
            .filter(|w| haystack.contains(w.as_str()))
            .count()
    }
}

impl MemoryStore for FileStore {
    fn recent_facts(&self, limit: usize, query: &str) -> String {
        let mut facts = self.load_facts();
        if facts.is_empty() {
            return String::new();
        }

        let query_words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .map(|w| w.to_string())
            .collect();

        // Best matches first, recency as the tie-breaker.
        facts.sort_by(|a, b| {
            Self::score(b, &query_words)
                .cmp(&Self::score(a, &query_words))
                .then(b.saved_at.cmp(&a.saved_at))
        });

        facts
            .iter()
            .take(limit)
            .map(|f| format!("- [{}] {}", f.kind, f.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn save_fact(&self, kind: &str, text: &str) -> Result<(), ValetError> {
        let fact = Fact {
            kind: kind.to_string(),
            text: text.to_string(),
            saved_at: Utc::now(),
        };
        let line = serde_json::to_string(&fact)
            .map_err(|e| ValetError::Internal(format!("fact serialization: {e}")))?;

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.facts_path())?;
        writeln!(file, "{line}")?;
        debug!(kind, "fact saved");
        Ok(())
    }

    fn save_daily_log(&self, when: DateTime<Utc>, text: &str) -> Result<(), ValetError> {
        let path = self
            .dir
            .join("daily")
            .join(format!("{}.md", when.format("%Y-%m-%d")));

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{text}")?;
        Ok(())
    }
}
