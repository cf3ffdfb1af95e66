// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in bash command execution tool.
//!
//! Executes shell commands via `bash -c` and returns stdout/stderr. Command
//! safety (sudo, destructive patterns) is enforced by the guard before this
//! handler ever runs.

use async_trait::async_trait;
use valet_core::types::AccessLevel;
use valet_core::ValetError;

use crate::tool::{Tool, ToolOutput};

/// Executes bash commands and returns stdout/stderr.
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command and return stdout/stderr"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn required_level(&self) -> AccessLevel {
        AccessLevel::Owner
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, ValetError> {
        let command = input["command"]
            .as_str()
            .ok_or_else(|| ValetError::ToolRecoverable {
                tool: "bash".to_string(),
                message: "missing required 'command' parameter".to_string(),
            })?;

        let output = tokio::process::Command::new("bash")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| ValetError::ToolFailed {
                tool: "bash".to_string(),
                message: format!("failed to execute bash command: {e}"),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let is_error = !output.status.success();
        let content = if is_error {
            let exit_code = output.status.code().unwrap_or(-1);
            format!("Exit code: {exit_code}\nstdout:\n{stdout}\nstderr:\n{stderr}")
        } else if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{stdout}\nstderr:\n{stderr}")
        };

        Ok(ToolOutput { content, is_error })
    }
}
