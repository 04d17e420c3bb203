// ABOUTME: CLI argument parsing and command routing for wall-live
//
// Provides command-line interface for:
// - Streaming hold and pose updates from the live session (watch)
// - Sending session control actions (action)
// - Lighting up a route on the wall (preview)
// - Printing the effective configuration (config)

pub mod action;
pub mod config;
pub mod preview;
pub mod util;
pub mod watch;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::live::SessionAction;

/// Live connection client for the climbing wall
#[derive(Parser)]
#[command(name = "wall-live")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Extra config file layered over the default locations
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Append JSON logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Stream hold and pose updates from the live session
    Watch(WatchArgs),

    /// Send a control action to the live session
    Action(ActionArgs),

    /// Send a route preview to the wall
    Preview(PreviewArgs),

    /// Print the effective configuration
    Config,
}

/// Arguments for the watch command
#[derive(clap::Args)]
pub struct WatchArgs {
    /// Stop after this many updates
    #[arg(long, short = 'n')]
    pub max_events: Option<usize>,
}

/// Arguments for the action command
#[derive(clap::Args)]
pub struct ActionArgs {
    /// Action to send (restart, relay, pause)
    pub action: SessionAction,

    /// Seconds to wait for the session channel to open
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

/// Arguments for the preview command
#[derive(clap::Args)]
pub struct PreviewArgs {
    /// Route JSON file
    pub route: PathBuf,

    /// Send even if the route has layout warnings
    #[arg(long, short)]
    pub force: bool,

    /// Seconds to wait for the preview channel to open
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_command() {
        let cli = Cli::try_parse_from(["wall-live", "action", "relay", "--timeout", "3"]).unwrap();

        match cli.command {
            Commands::Action(args) => {
                assert_eq!(args.action, SessionAction::Relay);
                assert_eq!(args.timeout, 3);
            }
            _ => panic!("expected action command"),
        }
    }

    #[test]
    fn test_rejects_unknown_action() {
        assert!(Cli::try_parse_from(["wall-live", "action", "jump"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["wall-live", "watch", "-n", "5", "--format", "json", "--log-json"])
                .unwrap();

        assert!(matches!(cli.format, OutputFormat::Json));
        assert!(cli.log_json);
        match cli.command {
            Commands::Watch(args) => assert_eq!(args.max_events, Some(5)),
            _ => panic!("expected watch command"),
        }
    }
}
