// ABOUTME: Connection registry: channel table, message fan-out and the reconnection controller
//
// One registry owns every live channel. Transport events come back through an
// EventSink bound to (channel, generation); events whose generation no longer
// matches the table entry belong to a superseded connection and are ignored.
// Subscriber callbacks and open hooks always run with the table unlocked.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use super::channel::{
    Channel, ChannelId, ChannelState, OpenHook, Subscriber, Subscription, SubscriptionId,
};
use super::reconnect::{ReconnectPolicy, RetryHandle};
use super::transport::{
    is_expected_close, Connection, EventSink, ReadyState, Transport, TransportError,
    TransportEvent, CLOSE_NORMAL,
};

/// Errors surfaced by registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Endpoint is not a valid URL
    #[error("Invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    /// Registry was disposed; no new channels may be opened
    #[error("Connection registry has been disposed")]
    Disposed,

    /// Channel is not in the table
    #[error("Channel not found: {0}")]
    UnknownChannel(ChannelId),

    /// Transport could not start a connection
    #[error("Failed to open channel {channel}: {source}")]
    Transport {
        channel: ChannelId,
        #[source]
        source: TransportError,
    },

    /// Payload could not be serialized
    #[error("Failed to encode payload for channel {channel}: {source}")]
    Encode {
        channel: ChannelId,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of a send request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame handed to the transport
    Sent,
    /// Channel was not open; the frame was discarded
    Dropped,
}

#[derive(Default)]
struct Table {
    channels: HashMap<ChannelId, Channel>,
    disposed: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    reconnect_eligible: HashSet<ChannelId>,
    next_generation: AtomicU64,
    table: Mutex<Table>,
}

/// Registry of named channels multiplexed over independent transport connections
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ConnectionRegistry {
    shared: Arc<Shared>,
}

impl ConnectionRegistry {
    /// Create a registry where only the session channel reconnects
    pub fn create(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        Self::with_reconnect_channels(transport, policy, [ChannelId::session()])
    }

    /// Create a registry with an explicit set of reconnect-eligible channels
    pub fn with_reconnect_channels(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        reconnect_eligible: impl IntoIterator<Item = ChannelId>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                policy,
                reconnect_eligible: reconnect_eligible.into_iter().collect(),
                next_generation: AtomicU64::new(0),
                table: Mutex::new(Table::default()),
            }),
        }
    }

    /// Reconnection policy in force
    #[must_use]
    pub fn policy(&self) -> ReconnectPolicy {
        self.shared.policy
    }

    /// Whether unexpected termination of `channel` triggers reconnection
    #[must_use]
    pub fn is_reconnect_eligible(&self, channel: &ChannelId) -> bool {
        self.shared.reconnect_eligible.contains(channel)
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.shared
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        self.shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn event_sink(&self, channel: &ChannelId, generation: u64) -> EventSink {
        let shared = Arc::downgrade(&self.shared);
        let channel = channel.clone();
        EventSink::new(move |event| {
            if let Some(shared) = shared.upgrade() {
                Self { shared }.handle_event(&channel, generation, event);
            }
        })
    }

    // === Channel Table ===

    /// Open a channel, or do nothing if it already has an entry
    ///
    /// An entry exists while connecting, connected, or waiting on a scheduled
    /// reconnect; in all of those cases the call is a no-op.
    pub fn open(&self, channel: impl Into<ChannelId>, endpoint: &str) -> Result<(), RegistryError> {
        let channel = channel.into();
        let endpoint = Url::parse(endpoint).map_err(|source| RegistryError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let mut table = self.table();
        if table.disposed {
            return Err(RegistryError::Disposed);
        }
        if table.channels.contains_key(&channel) {
            debug!(channel = %channel, "Channel already registered, ignoring open");
            return Ok(());
        }

        let generation = self.next_generation();
        let connection = self
            .shared
            .transport
            .connect(&endpoint, self.event_sink(&channel, generation))
            .map_err(|source| RegistryError::Transport {
                channel: channel.clone(),
                source,
            })?;

        info!(channel = %channel, endpoint = %endpoint, "Opening channel");
        table
            .channels
            .insert(channel.clone(), Channel::new(endpoint, connection, generation));

        Ok(())
    }

    /// Terminal close: cancel any pending retry, close the connection, drop the entry
    ///
    /// Returns false if the channel was not registered.
    pub fn close(&self, channel: &ChannelId) -> bool {
        let removed = self.table().channels.remove(channel);
        let Some(mut entry) = removed else {
            return false;
        };

        entry.cancel_retry();
        if let Some(mut connection) = entry.connection.take() {
            connection.close(CLOSE_NORMAL, "client closed");
        }

        info!(channel = %channel, "Channel closed by caller");
        true
    }

    /// Close every registered channel
    pub fn close_all(&self) {
        let channels: Vec<ChannelId> = self.table().channels.keys().cloned().collect();
        for channel in &channels {
            self.close(channel);
        }
    }

    /// Close everything and refuse further opens
    pub fn dispose_all(&self) {
        self.table().disposed = true;
        self.close_all();
        debug!("Connection registry disposed");
    }

    /// Whether [`dispose_all`](Self::dispose_all) has run
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.table().disposed
    }

    /// Serialize `payload` and send it if the channel is open
    ///
    /// A channel that is missing or not open yields [`SendOutcome::Dropped`]
    /// with a warning; nothing is queued.
    pub fn send<T>(&self, channel: &ChannelId, payload: &T) -> Result<SendOutcome, RegistryError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(payload).map_err(|source| RegistryError::Encode {
            channel: channel.clone(),
            source,
        })?;

        let table = self.table();
        let Some(entry) = table.channels.get(channel) else {
            warn!(channel = %channel, "Tried to send message on unknown channel");
            return Ok(SendOutcome::Dropped);
        };

        match entry.connection.as_ref() {
            Some(connection) if connection.ready_state() == ReadyState::Open => {
                match connection.send_text(text) {
                    Ok(()) => Ok(SendOutcome::Sent),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Transport refused message");
                        Ok(SendOutcome::Dropped)
                    }
                }
            }
            _ => {
                warn!(
                    channel = %channel,
                    state = ?entry.ready_state(),
                    "Tried to send message but channel not open"
                );
                Ok(SendOutcome::Dropped)
            }
        }
    }

    /// Register a subscriber on a channel
    ///
    /// Subscribing the same callback twice returns the existing registration.
    pub fn subscribe(
        &self,
        channel: &ChannelId,
        subscriber: Subscriber,
    ) -> Result<Subscription, RegistryError> {
        let mut table = self.table();
        let entry = table
            .channels
            .get_mut(channel)
            .ok_or_else(|| RegistryError::UnknownChannel(channel.clone()))?;

        let id = entry.subscribers.insert(subscriber);
        debug!(channel = %channel, subscription = %id, "Subscriber added");

        Ok(Subscription {
            channel: channel.clone(),
            id,
        })
    }

    /// Revoke a subscription; returns false if it was not registered
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut table = self.table();
        let removed = table
            .channels
            .get_mut(&subscription.channel)
            .is_some_and(|entry| entry.subscribers.remove(subscription.id));

        if removed {
            debug!(
                channel = %subscription.channel,
                subscription = %subscription.id,
                "Subscriber removed"
            );
        }
        removed
    }

    /// Whether a subscription is still registered
    #[must_use]
    pub fn is_subscribed(&self, subscription: &Subscription) -> bool {
        self.table()
            .channels
            .get(&subscription.channel)
            .is_some_and(|entry| entry.subscribers.contains(subscription.id))
    }

    /// Attach a hook that runs after every successful open of `channel`
    pub fn on_open(&self, channel: &ChannelId, hook: OpenHook) -> Result<(), RegistryError> {
        let mut table = self.table();
        let entry = table
            .channels
            .get_mut(channel)
            .ok_or_else(|| RegistryError::UnknownChannel(channel.clone()))?;
        entry.on_open = Some(hook);
        Ok(())
    }

    // === Introspection ===

    /// Whether the channel has an entry in the table
    #[must_use]
    pub fn contains(&self, channel: &ChannelId) -> bool {
        self.table().channels.contains_key(channel)
    }

    /// Whether the channel's connection is open for sending
    #[must_use]
    pub fn is_open(&self, channel: &ChannelId) -> bool {
        self.table()
            .channels
            .get(channel)
            .is_some_and(|entry| entry.ready_state() == ReadyState::Open)
    }

    /// Reconnection state of a channel
    #[must_use]
    pub fn channel_state(&self, channel: &ChannelId) -> Option<ChannelState> {
        self.table().channels.get(channel).map(|entry| entry.state)
    }

    /// Endpoint a channel was opened against
    #[must_use]
    pub fn endpoint(&self, channel: &ChannelId) -> Option<Url> {
        self.table()
            .channels
            .get(channel)
            .map(|entry| entry.endpoint.clone())
    }

    /// Consecutive reconnect attempts used by a channel
    #[must_use]
    pub fn reconnect_attempts(&self, channel: &ChannelId) -> Option<u32> {
        self.table()
            .channels
            .get(channel)
            .map(|entry| entry.reconnect_attempts)
    }

    /// Whether a reopen is scheduled for a channel
    #[must_use]
    pub fn has_pending_retry(&self, channel: &ChannelId) -> bool {
        self.table()
            .channels
            .get(channel)
            .is_some_and(|entry| entry.pending_retry.is_some())
    }

    /// Number of subscribers on a channel (0 if absent)
    #[must_use]
    pub fn subscriber_count(&self, channel: &ChannelId) -> usize {
        self.table()
            .channels
            .get(channel)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Registered channel identifiers, sorted
    #[must_use]
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.table().channels.keys().cloned().collect();
        ids.sort();
        ids
    }

    // === Transport Events ===

    fn handle_event(&self, channel: &ChannelId, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.handle_opened(channel, generation),
            TransportEvent::Message(text) => self.dispatch(channel, generation, &text),
            TransportEvent::Closed { code, reason } => {
                self.handle_closed(channel, generation, code, &reason);
            }
            TransportEvent::Error(message) => {
                if self.is_current(channel, generation) {
                    error!(channel = %channel, error = %message, "Transport error");
                }
            }
        }
    }

    fn is_current(&self, channel: &ChannelId, generation: u64) -> bool {
        self.table()
            .channels
            .get(channel)
            .is_some_and(|entry| entry.generation == generation)
    }

    fn handle_opened(&self, channel: &ChannelId, generation: u64) {
        let hook = {
            let mut table = self.table();
            let Some(entry) = table.channels.get_mut(channel) else {
                return;
            };
            if entry.generation != generation {
                debug!(channel = %channel, "Ignoring open from superseded connection");
                return;
            }

            entry.state = ChannelState::Connected;
            entry.reconnect_attempts = 0;
            entry.cancel_retry();
            info!(channel = %channel, endpoint = %entry.endpoint, "Channel connected");
            entry.on_open.clone()
        };

        if let Some(hook) = hook {
            hook(self);
        }
    }

    // === Message Fan-out ===

    fn dispatch(&self, channel: &ChannelId, generation: u64, text: &str) {
        let recipients = {
            let table = self.table();
            match table.channels.get(channel) {
                Some(entry) if entry.generation == generation => entry.subscribers.ids(),
                _ => return,
            }
        };

        let payload: Value = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Discarding invalid message");
                return;
            }
        };

        for id in recipients {
            // Re-checked per recipient so a subscription revoked mid-dispatch is skipped
            let Some(subscriber) = self.live_subscriber(channel, generation, id) else {
                continue;
            };

            match catch_unwind(AssertUnwindSafe(|| subscriber(&payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(channel = %channel, subscription = %id, error = %e, "Subscriber error");
                }
                Err(_) => {
                    error!(channel = %channel, subscription = %id, "Subscriber panicked");
                }
            }
        }
    }

    fn live_subscriber(
        &self,
        channel: &ChannelId,
        generation: u64,
        id: SubscriptionId,
    ) -> Option<Subscriber> {
        let table = self.table();
        let entry = table.channels.get(channel)?;
        if entry.generation != generation {
            return None;
        }
        entry.subscribers.get(id)
    }

    // === Reconnection Controller ===

    fn handle_closed(&self, channel: &ChannelId, generation: u64, code: u16, reason: &str) {
        let released: Option<Box<dyn Connection>>;
        {
            let mut table = self.table();
            let Some(entry) = table.channels.get_mut(channel) else {
                debug!(channel = %channel, code, "Close for unregistered channel");
                return;
            };
            if entry.generation != generation {
                debug!(channel = %channel, code, "Ignoring close from superseded connection");
                return;
            }

            released = entry.connection.take();
            entry.state = ChannelState::Disconnected;

            if is_expected_close(code) {
                info!(channel = %channel, code, reason = %reason, "Channel closed");
                table.channels.remove(channel);
            } else if !self.is_reconnect_eligible(channel) {
                warn!(
                    channel = %channel,
                    code,
                    reason = %reason,
                    "Channel terminated unexpectedly, not reconnect-eligible"
                );
                table.channels.remove(channel);
            } else {
                warn!(channel = %channel, code, reason = %reason, "Channel terminated unexpectedly");
                self.schedule_retry(&mut table, channel);
            }
        }
        drop(released);
    }

    /// Schedule the next reopen, or drop the channel once the ceiling is hit
    fn schedule_retry(&self, table: &mut Table, channel: &ChannelId) {
        let policy = self.shared.policy;
        let Some(entry) = table.channels.get_mut(channel) else {
            return;
        };

        let attempt = entry.reconnect_attempts.saturating_add(1);
        let Some(delay) = policy.delay_for(attempt) else {
            error!(
                channel = %channel,
                attempts = entry.reconnect_attempts,
                max = policy.max_attempts,
                "Reconnect attempts exhausted, giving up"
            );
            table.channels.remove(channel);
            return;
        };

        // The fresh generation doubles as the retry token
        let token = self.next_generation();
        let shared = Arc::downgrade(&self.shared);
        let target = channel.clone();
        let retry = match RetryHandle::schedule(attempt, delay, move || {
            if let Some(shared) = shared.upgrade() {
                Self { shared }.fire_retry(&target, token);
            }
        }) {
            Ok(retry) => retry,
            Err(e) => {
                error!(channel = %channel, error = %e, "Cannot schedule reconnect without a runtime");
                table.channels.remove(channel);
                return;
            }
        };

        entry.reconnect_attempts = attempt;
        entry.generation = token;
        entry.state = ChannelState::RetryScheduled;
        // Replacing the slot aborts any previous timer
        entry.pending_retry = Some(retry);

        info!(
            channel = %channel,
            attempt,
            max = policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );
    }

    fn fire_retry(&self, channel: &ChannelId, token: u64) {
        let mut table = self.table();
        if table.disposed {
            return;
        }
        let Some(entry) = table.channels.get_mut(channel) else {
            return;
        };
        if entry.generation != token || entry.state != ChannelState::RetryScheduled {
            debug!(channel = %channel, "Ignoring stale reconnect timer");
            return;
        }

        // Aborting the running timer is harmless: it finishes on this poll
        drop(entry.pending_retry.take());

        // Subscriptions belong to the transport instance being replaced
        entry.subscribers.clear();

        let generation = self.next_generation();
        entry.generation = generation;
        entry.state = ChannelState::Disconnected;
        info!(
            channel = %channel,
            attempt = entry.reconnect_attempts,
            endpoint = %entry.endpoint,
            "Reconnecting channel"
        );

        let endpoint = entry.endpoint.clone();
        match self
            .shared
            .transport
            .connect(&endpoint, self.event_sink(channel, generation))
        {
            Ok(connection) => {
                entry.connection = Some(connection);
            }
            Err(e) => {
                error!(channel = %channel, error = %e, "Reconnect attempt failed to start");
                self.schedule_retry(&mut table, channel);
            }
        }
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("channels", &self.channel_ids())
            .field("policy", &self.shared.policy)
            .finish_non_exhaustive()
    }
}
