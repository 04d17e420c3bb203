// ABOUTME: WebSocket transport built on tokio-tungstenite
//
// Each connection runs in its own task: handshake (bounded by a timeout), then
// a select loop that forwards outbound frames from the handle and reports
// inbound frames and termination through the EventSink. A failed or timed-out
// handshake is reported as an abnormal close (1006).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use super::transport::{
    Connection, EventSink, ReadyState, Transport, TransportError, CLOSE_ABNORMAL,
    CLOSE_NO_STATUS,
};

/// Default handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frame queued by a connection handle for its socket task
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Transport that opens real WebSocket connections
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsTransport {
    /// Create a transport with the given handshake timeout
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Handshake timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Transport for WsTransport {
    fn connect(
        &self,
        endpoint: &Url,
        events: EventSink,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let ready = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        runtime.spawn(run_socket(
            endpoint.clone(),
            self.connect_timeout,
            Arc::clone(&ready),
            outbound_rx,
            events,
        ));

        Ok(Box::new(WsConnection {
            ready,
            outbound: outbound_tx,
        }))
    }
}

/// Handle to one socket task
struct WsConnection {
    ready: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection for WsConnection {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready.load(Ordering::SeqCst))
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::TaskGone)
    }

    fn close(&mut self, code: u16, reason: &str) {
        if matches!(self.ready_state(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.ready.store(ReadyState::Closing as u8, Ordering::SeqCst);
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

fn set_state(ready: &AtomicU8, state: ReadyState) {
    ready.store(state as u8, Ordering::SeqCst);
}

async fn run_socket(
    endpoint: Url,
    connect_timeout: Duration,
    ready: Arc<AtomicU8>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
) {
    debug!(endpoint = %endpoint, "Starting WebSocket handshake");

    let stream = match tokio::time::timeout(connect_timeout, connect_async(endpoint.as_str())).await
    {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            set_state(&ready, ReadyState::Closed);
            events.error(format!("handshake failed: {e}"));
            events.closed(CLOSE_ABNORMAL, "handshake failed");
            return;
        }
        Err(_) => {
            set_state(&ready, ReadyState::Closed);
            events.error(format!(
                "handshake timed out after {}ms",
                connect_timeout.as_millis()
            ));
            events.closed(CLOSE_ABNORMAL, "handshake timed out");
            return;
        }
    };

    // A close requested while the handshake was in flight wins over the open
    if ready.load(Ordering::SeqCst) == ReadyState::Connecting as u8 {
        set_state(&ready, ReadyState::Open);
        events.opened();
    }

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!(endpoint = %endpoint, error = %e, "Failed to write frame");
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    set_state(&ready, ReadyState::Closing);
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!(endpoint = %endpoint, error = %e, "Close frame not delivered");
                    }
                    set_state(&ready, ReadyState::Closed);
                    events.closed(code, reason);
                    return;
                }
                None => {
                    // Handle dropped without an explicit close
                    let _ = write.close().await;
                    set_state(&ready, ReadyState::Closed);
                    return;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => events.message(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => events.message(text),
                    Err(_) => warn!(endpoint = %endpoint, "Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                        (u16::from(f.code), f.reason.into_owned())
                    });
                    // Push out the queued close reply before the socket drops
                    if let Err(e) = write.flush().await {
                        debug!(endpoint = %endpoint, error = %e, "Close reply not delivered");
                    }
                    set_state(&ready, ReadyState::Closed);
                    events.closed(code, reason);
                    return;
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    set_state(&ready, ReadyState::Closed);
                    events.error(e.to_string());
                    events.closed(CLOSE_ABNORMAL, "");
                    return;
                }
                None => {
                    set_state(&ready, ReadyState::Closed);
                    events.closed(CLOSE_ABNORMAL, "stream ended");
                    return;
                }
            },
        }
    }
}
