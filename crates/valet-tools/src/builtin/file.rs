// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in file I/O tools: `read_file`, `write_file`, `list_files`.
//!
//! Protected-path enforcement happens in the guard, keyed on these tool
//! names. Read contents are truncated to 100KB to bound token usage.

use async_trait::async_trait;
use valet_core::types::AccessLevel;
use valet_core::ValetError;

use crate::tool::{Tool, ToolOutput};

/// Maximum file read size in bytes (100KB).
const MAX_READ_SIZE: usize = 100 * 1024;

fn require_path(input: &serde_json::Value, tool: &str) -> Result<String, ValetError> {
    input["path"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| ValetError::ToolRecoverable {
            tool: tool.to_string(),
            message: "missing required 'path' parameter".to_string(),
        })
}

/// Reads a text file.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file and return its contents"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "The file path to read"}
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError> {
        let path = require_path(&input, "read_file")?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let output = if contents.len() > MAX_READ_SIZE {
                    let mut end = MAX_READ_SIZE;
                    while !contents.is_char_boundary(end) {
                        end -= 1;
                    }
                    format!(
                        "{}...\n\n[File truncated from {} to {} bytes]",
                        &contents[..end],
                        contents.len(),
                        end
                    )
                } else {
                    contents
                };
                Ok(ToolOutput::ok(output))
            }
            Err(e) => Ok(ToolOutput::error(format!(
                "failed to read file '{path}': {e}"
            ))),
        }
    }
}

/// Writes a text file, creating parent directories as needed.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if needed"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "The file path to write"},
                "content": {"type": "string", "description": "Content to write"}
            },
            "required": ["path", "content"]
        })
    }

    fn required_level(&self) -> AccessLevel {
        AccessLevel::Admin
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError> {
        let path = require_path(&input, "write_file")?;
        let content = input["content"]
            .as_str()
            .ok_or_else(|| ValetError::ToolRecoverable {
                tool: "write_file".to_string(),
                message: "missing required 'content' parameter".to_string(),
            })?;

        if let Some(parent) = std::path::Path::new(&path).parent()
            && !parent.as_os_str().is_empty()
        {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolOutput::error(format!(
                    "failed to create parent directory: {e}"
                )));
            }
        }

        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolOutput::ok(format!(
                "Wrote {} bytes to {path}",
                content.len()
            ))),
            Err(e) => Ok(ToolOutput::error(format!(
                "failed to write file '{path}': {e}"
            ))),
        }
    }
}

/// Lists a directory.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a directory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "The directory to list"}
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError> {
        let path = require_path(&input, "list_files")?;
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) => {
                return Ok(ToolOutput::error(format!(
                    "failed to list directory '{path}': {e}"
                )));
            }
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let suffix = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => "/",
                _ => "",
            };
            names.push(format!("{}{suffix}", entry.file_name().to_string_lossy()));
        }
        names.sort();
        Ok(ToolOutput::ok(names.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.txt");
        let path_str = path.to_string_lossy().to_string();

        let write = WriteFileTool
            .invoke(serde_json::json!({"path": path_str, "content": "remember the milk"}))
            .await
            .unwrap();
        assert!(!write.is_error);

        let read = ReadFileTool
            .invoke(serde_json::json!({"path": path_str}))
            .await
            .unwrap();
        assert_eq!(read.content, "remember the milk");
    }

    #[tokio::test]
    async fn read_missing_file_reports_error_output() {
        let output = ReadFileTool
            .invoke(serde_json::json!({"path": "/nonexistent/nope.txt"}))
            .await
            .unwrap();
        assert!(output.is_error);
        assert!(output.content.contains("failed to read"));
    }

    #[tokio::test]
    async fn list_files_marks_directories() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "x").await.unwrap();

        let output = ListFilesTool
            .invoke(serde_json::json!({"path": dir.path().to_string_lossy()}))
            .await
            .unwrap();
        assert_eq!(output.content, "a.txt\nsub/");
    }

    #[tokio::test]
    async fn missing_path_is_recoverable() {
        let err = ReadFileTool.invoke(serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "tool_recoverable");
    }

    #[test]
    fn write_requires_admin() {
        assert_eq!(WriteFileTool.required_level(), AccessLevel::Admin);
        assert_eq!(ReadFileTool.required_level(), AccessLevel::User);
    }
}
