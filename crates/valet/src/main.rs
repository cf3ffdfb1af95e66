// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Valet - a multi-channel personal AI assistant daemon.
//!
//! Binary entry point.

mod serve;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Valet - a multi-channel personal AI assistant daemon.
#[derive(Parser, Debug)]
#[command(name = "valet", version, about, long_about = None)]
struct Cli {
    /// Path to the config file (default: XDG hierarchy).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the assistant daemon.
    Serve,
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Serve => match serve::run_serve(config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        Commands::CheckConfig => {
            println!(
                "config ok: name={} model={} policy={} workspaces={}",
                config.agent.name,
                config.agent.model,
                config.access.policy,
                config.workspaces.len()
            );
            ExitCode::SUCCESS
        }
    }
}

fn load(
    path: Option<&std::path::Path>,
) -> Result<valet_config::ValetConfig, valet_config::ConfigError> {
    match path {
        Some(path) => valet_config::load_config_from_path(path),
        None => valet_config::load_config(),
    }
}
