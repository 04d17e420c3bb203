// ABOUTME: CLI preview command - load a route file and light it up on the wall
//
// The route is linted first; layout warnings abort the send unless --force is given.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::warn;

use super::util::{build_client, wait_for_open};
use super::{OutputFormat, PreviewArgs};
use crate::config::LiveConfig;
use crate::live::{ChannelId, SendOutcome};
use crate::models::Route;

#[derive(Debug, Serialize)]
struct PreviewReport {
    route: String,
    holds: usize,
    warnings: Vec<String>,
    sent: bool,
}

/// Execute the preview command
pub async fn execute(args: PreviewArgs, format: OutputFormat, config: &LiveConfig) -> Result<()> {
    let route = Route::load(&args.route)?;
    let warnings: Vec<String> = route.lint().iter().map(ToString::to_string).collect();

    for warning in &warnings {
        warn!(route = %route.name, "{warning}");
        if matches!(format, OutputFormat::Text) {
            eprintln!("warning: {warning}");
        }
    }
    if !warnings.is_empty() && !args.force {
        bail!(
            "Route '{}' has {} layout warning(s); pass --force to send anyway",
            route.name,
            warnings.len()
        );
    }

    let client = build_client(config);
    client
        .connect_preview()
        .context("Failed to connect the preview channel")?;

    let channel = ChannelId::default_channel();
    let ready = wait_for_open(client.registry(), &channel, Duration::from_secs(args.timeout)).await;
    let outcome = match ready {
        Ok(()) => client.send_preview(&route),
        Err(e) => {
            client.registry().dispose_all();
            return Err(e);
        }
    };
    client.registry().dispose_all();

    let sent = outcome.context("Failed to send preview")? == SendOutcome::Sent;
    let report = PreviewReport {
        route: route.name.clone(),
        holds: route.holds().len(),
        warnings,
        sent,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&report)?),
        OutputFormat::Text if sent => println!(
            "Previewing '{}' ({} holds) on {}",
            report.route, report.holds, config.preview.endpoint
        ),
        OutputFormat::Text => {}
    }

    if !sent {
        bail!("Preview of '{}' was dropped: channel not open", route.name);
    }
    Ok(())
}
