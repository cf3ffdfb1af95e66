// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Blocking approval flow for tools in the `require_confirmation` list.
//!
//! When the guard flags a call, the executor asks the approval manager to
//! send a confirmation message to the caller's chat and block until
//! `/approve` or `/deny` arrives, or the timeout elapses (treated as deny).
//! At most one request is pending per session.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// A pending confirmation request.
struct PendingApproval {
    tool_name: String,
    tx: oneshot::Sender<bool>,
}

/// Manages pending tool confirmations, keyed by session.
#[derive(Default)]
pub struct ApprovalManager {
    pending: Mutex<HashMap<String, PendingApproval>>,
}

impl ApprovalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends a confirmation prompt via `send_msg` and waits for resolution.
    ///
    /// Returns `true` only when `/approve` arrives within `timeout`. A second
    /// request for the same session replaces the first (the first resolves
    /// as denied).
    pub async fn request(
        &self,
        session_key: &str,
        caller: &str,
        tool_name: &str,
        args_summary: &str,
        send_msg: impl Fn(String),
        timeout: Duration,
    ) -> bool {
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock();
            if let Some(old) = pending.remove(session_key) {
                warn!(
                    session = session_key,
                    tool = %old.tool_name,
                    "replacing pending approval request"
                );
                let _ = old.tx.send(false);
            }
            pending.insert(
                session_key.to_string(),
                PendingApproval {
                    tool_name: tool_name.to_string(),
                    tx,
                },
            );
        }

        send_msg(format!(
            "⚠️ Confirmation required: {tool_name} {args_summary}\nReply /approve or /deny."
        ));
        info!(session = session_key, caller, tool = tool_name, "confirmation requested");

        let approved = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(approved)) => approved,
            // Channel dropped or timeout: deny.
            _ => {
                self.pending.lock().remove(session_key);
                false
            }
        };

        info!(session = session_key, tool = tool_name, approved, "confirmation resolved");
        approved
    }

    /// Resolves the pending request for a session. Returns `false` when no
    /// request was pending.
    pub fn resolve(&self, session_key: &str, approve: bool) -> bool {
        let entry = self.pending.lock().remove(session_key);
        match entry {
            Some(pending) => {
                let _ = pending.tx.send(approve);
                true
            }
            None => false,
        }
    }

    /// Name of the tool awaiting confirmation for a session, if any.
    pub fn pending_tool(&self, session_key: &str) -> Option<String> {
        self.pending
            .lock()
            .get(session_key)
            .map(|p| p.tool_name.clone())
    }
}
