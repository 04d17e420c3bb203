// ABOUTME: Shared CLI utilities for building the live client and waiting on channels

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::{sleep, Instant};

use crate::config::LiveConfig;
use crate::live::{ChannelId, ConnectionRegistry, SessionClient, WsTransport};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Build a session client over a WebSocket registry from configuration
pub fn build_client(config: &LiveConfig) -> SessionClient {
    let transport = Arc::new(WsTransport::new(config.transport.connect_timeout));
    let registry = ConnectionRegistry::create(transport, config.reconnect);
    SessionClient::new(registry, config.endpoints())
}

/// Wait until `channel` is open
///
/// Fails if the channel leaves the registry or `timeout` elapses first.
pub async fn wait_for_open(
    registry: &ConnectionRegistry,
    channel: &ChannelId,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if registry.is_open(channel) {
            return Ok(());
        }
        if !registry.contains(channel) {
            bail!("Channel {channel} closed before it opened");
        }
        if Instant::now() >= deadline {
            bail!(
                "Timed out after {}s waiting for channel {channel} to open",
                timeout.as_secs()
            );
        }
        sleep(POLL_INTERVAL).await;
    }
}
