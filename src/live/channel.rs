// ABOUTME: Channel table entries: identifiers, subscriber sets and per-channel reconnect state

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use url::Url;
use uuid::Uuid;

use super::reconnect::RetryHandle;
use super::transport::{Connection, ReadyState};
use super::ConnectionRegistry;

// === Channel ID ===

/// Name of a logical channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    /// Identifier of the live session channel
    pub const SESSION: &'static str = "session";

    /// Identifier of the default (preview) channel
    pub const DEFAULT: &'static str = "default";

    /// Create a channel identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The session channel
    #[must_use]
    pub fn session() -> Self {
        Self::new(Self::SESSION)
    }

    /// The default channel
    #[must_use]
    pub fn default_channel() -> Self {
        Self::new(Self::DEFAULT)
    }

    /// Borrow the identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// === Subscriptions ===

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Generate a new unique subscription ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback receiving each decoded payload of a channel
pub type Subscriber = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Hook run after every successful open of a channel
pub type OpenHook = Arc<dyn Fn(&ConnectionRegistry) + Send + Sync>;

/// Wrap a closure as a [`Subscriber`]
pub fn subscriber<F>(callback: F) -> Subscriber
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Receipt for a registered subscriber
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Channel the subscriber is registered on
    pub channel: ChannelId,
    /// Identity of the registration
    pub id: SubscriptionId,
}

/// Identity comparison that ignores vtable pointers
fn same_subscriber(a: &Subscriber, b: &Subscriber) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Set of subscribers with identity-based membership
#[derive(Default)]
pub struct SubscriberSet {
    entries: HashMap<SubscriptionId, Subscriber>,
}

impl SubscriberSet {
    /// Insert a subscriber, returning the existing ID if it is already a member
    pub fn insert(&mut self, subscriber: Subscriber) -> SubscriptionId {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|(_, current)| same_subscriber(current, &subscriber))
            .map(|(id, _)| *id)
        {
            return existing;
        }

        let id = SubscriptionId::new();
        self.entries.insert(id, subscriber);
        id
    }

    /// Remove a subscriber by ID
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Whether the ID is currently registered
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Look up a subscriber by ID
    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<Subscriber> {
        self.entries.get(&id).cloned()
    }

    /// IDs registered right now
    #[must_use]
    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.entries.keys().copied().collect()
    }

    /// Number of subscribers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all subscribers
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("len", &self.entries.len())
            .finish()
    }
}

// === Channel State ===

/// Reconnection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Connecting, or terminated and awaiting a decision
    Disconnected,
    /// Transport reported a successful open
    Connected,
    /// A reopen is scheduled
    RetryScheduled,
}

/// One row of the channel table
pub(crate) struct Channel {
    /// Last endpoint used, reused by reconnects
    pub(crate) endpoint: Url,

    /// Live transport connection, if any
    pub(crate) connection: Option<Box<dyn Connection>>,

    /// Generation of `connection`; events from older generations are ignored
    pub(crate) generation: u64,

    pub(crate) subscribers: SubscriberSet,

    pub(crate) state: ChannelState,

    pub(crate) reconnect_attempts: u32,

    /// Scheduled reopen, aborted on drop
    pub(crate) pending_retry: Option<RetryHandle>,

    pub(crate) on_open: Option<OpenHook>,
}

impl Channel {
    pub(crate) fn new(endpoint: Url, connection: Box<dyn Connection>, generation: u64) -> Self {
        Self {
            endpoint,
            connection: Some(connection),
            generation,
            subscribers: SubscriberSet::default(),
            state: ChannelState::Disconnected,
            reconnect_attempts: 0,
            pending_retry: None,
            on_open: None,
        }
    }

    /// Ready state of the live connection, `Closed` when there is none
    pub(crate) fn ready_state(&self) -> ReadyState {
        self.connection
            .as_ref()
            .map_or(ReadyState::Closed, |connection| connection.ready_state())
    }

    /// Cancel any pending retry
    pub(crate) fn cancel_retry(&mut self) {
        if let Some(retry) = self.pending_retry.take() {
            retry.cancel();
        }
    }
}
