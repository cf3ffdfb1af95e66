// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output guardrail: rejects empty replies and replies that appear to leak
//! the layered system prompt verbatim.

use valet_core::ValetError;

/// Distinctive fragments of the composed system prompt. A reply containing
/// two or more of these is treated as a prompt leak.
const PROMPT_MARKERS: &[&str] = &[
    "## Tooling",
    "## Tool Call Style",
    "## Safety",
    "# Project Context",
    "## Current Date & Time",
    "Runtime: agent=",
];

/// Validates replies before they are sent to a channel.
pub struct OutputGuard {
    markers: Vec<String>,
}

impl OutputGuard {
    pub fn new() -> Self {
        Self {
            markers: PROMPT_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Returns an error for empty output or an apparent system-prompt leak.
    pub fn validate(&self, response: &str) -> Result<(), ValetError> {
        if response.trim().is_empty() {
            return Err(ValetError::Internal("empty response from agent".into()));
        }

        let marker_hits = self
            .markers
            .iter()
            .filter(|m| response.contains(m.as_str()))
            .count();
        if marker_hits >= 2 {
            return Err(ValetError::Internal(
                "response appears to contain the system prompt".into(),
            ));
        }

        Ok(())
    }
}

impl Default for OutputGuard {
    fn default() -> Self {
        Self::new()
    }
}
