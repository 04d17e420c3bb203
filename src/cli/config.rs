// ABOUTME: CLI config command - print the effective configuration

use anyhow::Result;

use super::OutputFormat;
use crate::config::LiveConfig;

/// Execute the config command
pub fn execute(format: OutputFormat, config: &LiveConfig) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config.to_toml()?),
    }
    Ok(())
}
