// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builtin tools always available to the agent, independent of loaded skills.

pub mod bash;
pub mod file;
pub mod http;
pub mod memory;

use std::sync::Arc;

use tracing::warn;
use valet_core::MemoryStore;

use crate::executor::ToolExecutor;

pub use bash::BashTool;
pub use file::{ListFilesTool, ReadFileTool, WriteFileTool};
pub use http::WebFetchTool;
pub use memory::{MemorySaveTool, MemorySearchTool};

/// Registers the builtin tool set on an executor.
pub fn register_builtin_tools(
    executor: &ToolExecutor,
    memory: Option<Arc<dyn MemoryStore>>,
    ssrf_allowed_ips: Vec<String>,
) {
    executor.register(Arc::new(BashTool));
    executor.register(Arc::new(ReadFileTool));
    executor.register(Arc::new(WriteFileTool));
    executor.register(Arc::new(ListFilesTool));

    match WebFetchTool::new(ssrf_allowed_ips) {
        Ok(tool) => executor.register(Arc::new(tool)),
        Err(e) => warn!(error = %e, "web_fetch tool not available"),
    }

    if let Some(store) = memory {
        executor.register(Arc::new(MemorySaveTool::new(Arc::clone(&store))));
        executor.register(Arc::new(MemorySearchTool::new(store)));
    }
}
