// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `valet serve` command implementation.
//!
//! Wires the model client, memory store, and assistant together, installs
//! signal handlers, and runs until shutdown. Channel transports register
//! themselves on the assistant's channel manager before `start`; a build
//! without any compiled-in transport still serves heartbeats and scheduled
//! work.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use valet_agent::{Assistant, install_signal_handler};
use valet_config::ValetConfig;
use valet_core::{MemoryStore, ValetError};
use valet_llm::ChatClient;
use valet_memory::FileStore;

/// Runs the `valet serve` command.
pub async fn run_serve(config: ValetConfig) -> Result<(), ValetError> {
    init_tracing(&config.agent.log_level);

    info!("starting valet serve");

    let api_key = config
        .api
        .api_key
        .clone()
        .or_else(|| std::env::var("VALET_API_API_KEY").ok())
        .ok_or_else(|| {
            ValetError::Config(
                "API key required. Set api.api_key in valet.toml or VALET_API_API_KEY".into(),
            )
        })?;

    let model = ChatClient::new(&config.api.base_url, &api_key, &config.agent.model)?
        .with_fallback_models(config.api.fallback_models.clone())
        .with_vision_model(config.api.vision_model.clone())
        .with_transcription_model(config.api.transcription_model.clone());
    let model = Arc::new(model);

    let memory: Option<Arc<dyn MemoryStore>> =
        match FileStore::new(Path::new(&config.memory.path).join("memory")) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "memory store not available");
                None
            }
        };

    let shutdown = install_signal_handler();
    let assistant = Assistant::new(config, model, memory, shutdown.clone());

    assistant.start().await?;

    // Run until a shutdown signal arrives.
    shutdown.cancelled().await;
    assistant.stop().await;

    info!("valet serve exited");
    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("valet={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
