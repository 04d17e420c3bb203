// ABOUTME: Transport seam for live channels: connection traits, lifecycle events and close codes
//
// The registry never talks to a socket library directly. A Transport opens one
// Connection per channel instance and reports lifecycle events through an
// EventSink, which lets tests drive the registry with an in-memory transport.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint is going away (page unload, server shutdown)
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// No status code was present in the close frame
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Returns true for close codes that mean a deliberate shutdown
#[must_use]
pub const fn is_expected_close(code: u16) -> bool {
    matches!(code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
}

/// Errors raised by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport needs a Tokio runtime and none is active
    #[error("No Tokio runtime available to drive the connection")]
    NoRuntime,

    /// The connection is not open
    #[error("Connection is not open")]
    NotOpen,

    /// The connection task has stopped accepting frames
    #[error("Connection task has shut down")]
    TaskGone,

    /// Handshake or socket failure
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
}

/// Ready state of a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress
    Connecting = 0,
    /// Frames can be sent
    Open = 1,
    /// Close handshake in progress
    Closing = 2,
    /// Connection is gone
    Closed = 3,
}

impl ReadyState {
    /// Decode a stored discriminant, treating unknown values as closed
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Lifecycle event reported by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed
    Opened,
    /// A text frame arrived
    Message(String),
    /// Connection terminated with a close code
    Closed {
        /// Close code (1006 when the socket dropped without a close frame)
        code: u16,
        /// Close reason, possibly empty
        reason: String,
    },
    /// Socket-level error; a `Closed` event follows
    Error(String),
}

/// Callback target for one connection's lifecycle events
///
/// Transports must not emit events synchronously from inside
/// [`Transport::connect`] or [`Connection::close`]; deliver them from the
/// connection's own task instead.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    /// Wrap a delivery function
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Deliver an event
    pub fn emit(&self, event: TransportEvent) {
        (self.deliver)(event);
    }

    /// Report a completed handshake
    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    /// Report an inbound text frame
    pub fn message(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    /// Report termination
    pub fn closed(&self, code: u16, reason: impl Into<String>) {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    /// Report a socket error
    pub fn error(&self, message: impl Into<String>) {
        self.emit(TransportEvent::Error(message.into()));
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// One live transport connection
#[cfg_attr(test, mockall::automock)]
pub trait Connection: Send {
    /// Current ready state
    fn ready_state(&self) -> ReadyState;

    /// Queue a text frame for transmission
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Start the close handshake
    fn close(&mut self, code: u16, reason: &str);
}

/// Factory for transport connections
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Start connecting to `endpoint`, reporting lifecycle through `events`
    fn connect(
        &self,
        endpoint: &Url,
        events: EventSink,
    ) -> Result<Box<dyn Connection>, TransportError>;
}
