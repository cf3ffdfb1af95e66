// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in memory tools: `memory_save` and `memory_search`.
//!
//! The compaction engine's memory-flush step instructs the model to call
//! `memory_save` before old history is discarded.

use std::sync::Arc;

use async_trait::async_trait;
use valet_core::{MemoryStore, ValetError};

use crate::tool::{Tool, ToolOutput};

/// Saves a fact to long-term memory.
pub struct MemorySaveTool {
    store: Arc<dyn MemoryStore>,
}

impl MemorySaveTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemorySaveTool {
    fn name(&self) -> &str {
        "memory_save"
    }

    fn description(&self) -> &str {
        "Save a fact to long-term memory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "kind": {
                    "type": "string",
                    "description": "Category of the fact (preference, person, note, ...)",
                    "default": "note"
                },
                "text": {
                    "type": "string",
                    "description": "The fact to remember"
                }
            },
            "required": ["text"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError> {
        let text = input["text"]
            .as_str()
            .ok_or_else(|| ValetError::ToolRecoverable {
                tool: "memory_save".to_string(),
                message: "missing required 'text' parameter".to_string(),
            })?;
        let kind = input["kind"].as_str().unwrap_or("note");

        self.store.save_fact(kind, text)?;
        Ok(ToolOutput::ok(format!("Saved [{kind}] fact.")))
    }
}

/// Searches long-term memory.
pub struct MemorySearchTool {
    store: Arc<dyn MemoryStore>,
}

impl MemorySearchTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term memory for relevant facts"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "limit": {
                    "type": "integer",
                    "default": 10,
                    "description": "Max facts to return"
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError> {
        let query = input["query"]
            .as_str()
            .ok_or_else(|| ValetError::ToolRecoverable {
                tool: "memory_search".to_string(),
                message: "missing required 'query' parameter".to_string(),
            })?;
        let limit = input["limit"].as_u64().unwrap_or(10) as usize;

        let facts = self.store.recent_facts(limit, query);
        if facts.is_empty() {
            Ok(ToolOutput::ok("No matching facts in memory."))
        } else {
            Ok(ToolOutput::ok(facts))
        }
    }
}
