// ABOUTME: CLI action command - send restart, relay or pause to the live session

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use super::util::{build_client, wait_for_open};
use super::{ActionArgs, OutputFormat};
use crate::config::LiveConfig;
use crate::live::{ChannelId, SendOutcome, SessionAction, SessionCallbacks};

#[derive(Debug, Serialize)]
struct ActionReport {
    action: SessionAction,
    endpoint: String,
    sent: bool,
}

/// Execute the action command
pub async fn execute(args: ActionArgs, format: OutputFormat, config: &LiveConfig) -> Result<()> {
    let client = build_client(config);
    let handle = client
        .connect_session(SessionCallbacks::new())
        .context("Failed to connect the session channel")?;

    let ready = wait_for_open(
        client.registry(),
        &ChannelId::session(),
        Duration::from_secs(args.timeout),
    )
    .await;

    let outcome = match ready {
        Ok(()) => client.send_session_action(args.action),
        Err(e) => {
            client.registry().dispose_all();
            return Err(e);
        }
    };

    handle.close();
    client.registry().dispose_all();

    let sent = outcome.context("Failed to send action")? == SendOutcome::Sent;
    let report = ActionReport {
        action: args.action,
        endpoint: config.session.endpoint.clone(),
        sent,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&report)?),
        OutputFormat::Text if sent => println!("Sent '{}' to {}", report.action, report.endpoint),
        OutputFormat::Text => {}
    }

    if !sent {
        bail!("Action '{}' was dropped: session channel not open", args.action);
    }
    Ok(())
}
