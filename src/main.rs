// ABOUTME: Main entry point for wall-live, the climbing wall live connection CLI
//
// Binary: wall-live
// Usage: wall-live <COMMAND>
// - watch: stream hold and pose updates
// - action: send restart, relay or pause
// - preview: light up a route on the wall
// - config: print the effective configuration

#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use wall_live::cli::{self, Commands};
use wall_live::config::LiveConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    setup_logging(args.log_json, args.log_file.as_deref())?;
    setup_panic_handler();

    let config = LiveConfig::load(args.config.as_deref())?;
    tracing::debug!(
        session = %config.session.endpoint,
        preview = %config.preview.endpoint,
        "Configuration loaded"
    );

    match args.command {
        Commands::Watch(watch_args) => cli::watch::execute(watch_args, args.format, &config).await,
        Commands::Action(action_args) => {
            cli::action::execute(action_args, args.format, &config).await
        }
        Commands::Preview(preview_args) => {
            cli::preview::execute(preview_args, args.format, &config).await
        }
        Commands::Config => cli::config::execute(args.format, &config),
    }
}

fn setup_logging(json: bool, log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wall_live=info".into());

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json() // Output in JSON Lines format
                        .with_target(true)
                        .with_writer(file)
                        .with_ansi(false),
                )
                .with(filter)
                .init();
        }
        None if json => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_writer(std::io::stderr),
                )
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .with(filter)
                .init();
        }
    }

    Ok(())
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
    }));
}
