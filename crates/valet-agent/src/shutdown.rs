// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shutdown signal wiring.
//!
//! The daemon runs until SIGINT or SIGTERM arrives; both resolve to the
//! root [`CancellationToken`] that the message loop, heartbeat, session
//! pruners, and every in-flight agent run watch. Child tokens derived from
//! the root observe the cancellation, so one signal drains the whole
//! pipeline.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Returns the daemon's root shutdown token, cancelled when SIGINT or
/// SIGTERM arrives.
///
/// The watcher task exits after the first signal; later signals find the
/// token already cancelled.
pub fn install_signal_handler() -> CancellationToken {
    let root = CancellationToken::new();
    spawn_signal_watcher(root.clone());
    root
}

fn spawn_signal_watcher(token: CancellationToken) {
    tokio::spawn(async move {
        let signal_name = wait_for_shutdown_signal().await;
        info!(signal = signal_name, "shutdown signal received, draining");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            // Without a SIGTERM stream the daemon still stops cleanly on an
            // interactive Ctrl+C.
            warn!(error = %e, "SIGTERM handler unavailable, watching SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handler_returns_a_live_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_propagates_to_child_tokens() {
        let token = install_signal_handler();
        let run_token = token.child_token();
        assert!(!run_token.is_cancelled());

        token.cancel();
        assert!(run_token.is_cancelled());
        run_token.cancelled().await;
    }
}
