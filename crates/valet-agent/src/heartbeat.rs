// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic proactive check-ins.
//!
//! On a configurable interval the assistant runs an ordinary agent turn
//! against the heartbeat prompt. Replies equal to the sentinel are
//! suppressed; anything else is delivered to the configured chat.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::assistant::Assistant;

/// Spawns the heartbeat loop. It stops when `cancel` fires.
pub fn spawn_heartbeat(assistant: Arc<Assistant>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            let interval_minutes = assistant.heartbeat_interval_minutes();
            let interval = Duration::from_secs(interval_minutes.max(1) * 60);

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("heartbeat loop stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    assistant.run_heartbeat().await;
                }
            }
        }
    });
}
