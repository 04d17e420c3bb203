// ABOUTME: Live wall connections: channel registry, reconnection, WebSocket transport and session adapter

pub mod channel;
pub mod commands;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod transport;
pub mod ws_transport;

pub use channel::{subscriber, ChannelId, ChannelState, OpenHook, Subscriber, Subscription, SubscriptionId};
pub use commands::{OutboundCommand, ParseActionError, SessionAction};
pub use reconnect::{ReconnectPolicy, RetryHandle};
pub use registry::{ConnectionRegistry, RegistryError, SendOutcome};
pub use session::{
    route_payload, Landmark, SessionCallbacks, SessionClient, SessionEndpoints, SessionEvent,
    SessionHandle,
};
pub use transport::{
    is_expected_close, Connection, EventSink, ReadyState, Transport, TransportError,
    TransportEvent,
};
pub use ws_transport::WsTransport;
