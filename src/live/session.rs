// ABOUTME: Session adapter: routes live session payloads to hold and pose callbacks and sends commands
//
// Payloads are matched by shape, not by a type tag. A `session.holds` array is
// a hold-layout update. Otherwise pose landmarks are looked up through a fixed
// priority list of legacy shapes (bare array, `pose`, `landmarks`,
// `pose_landmarks`); the first non-empty array wins.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::channel::{subscriber, ChannelId, OpenHook, Subscriber, Subscription};
use super::commands::{OutboundCommand, SessionAction};
use super::registry::{ConnectionRegistry, RegistryError, SendOutcome};
use crate::models::Route;

/// One body landmark from the pose tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Horizontal position
    pub x: f64,
    /// Vertical position
    pub y: f64,
    /// Depth, when the tracker reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    /// Detection confidence, when the tracker reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f64>,
}

/// Semantic event decoded from a session payload
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Current hold layout of the session
    Holds(Vec<Value>),
    /// Latest pose landmarks
    Pose(Vec<Landmark>),
}

type LandmarkExtractor = fn(&Value) -> Option<&Vec<Value>>;

fn bare_array(payload: &Value) -> Option<&Vec<Value>> {
    payload.as_array()
}

fn pose_field(payload: &Value) -> Option<&Vec<Value>> {
    payload.get("pose").and_then(Value::as_array)
}

fn landmarks_field(payload: &Value) -> Option<&Vec<Value>> {
    payload.get("landmarks").and_then(Value::as_array)
}

fn pose_landmarks_field(payload: &Value) -> Option<&Vec<Value>> {
    payload.get("pose_landmarks").and_then(Value::as_array)
}

/// Landmark shapes in priority order
const LANDMARK_SHAPES: [(&str, LandmarkExtractor); 4] = [
    ("bare", bare_array),
    ("pose", pose_field),
    ("landmarks", landmarks_field),
    ("pose_landmarks", pose_landmarks_field),
];

/// Classify a decoded session payload
///
/// Returns `None` for payloads that match neither kind, for empty landmark
/// arrays, and for landmark arrays whose points are malformed.
pub fn route_payload(payload: &Value) -> Option<SessionEvent> {
    if let Some(holds) = payload
        .get("session")
        .and_then(|session| session.get("holds"))
        .and_then(Value::as_array)
    {
        return Some(SessionEvent::Holds(holds.clone()));
    }

    let (shape, points) = LANDMARK_SHAPES.iter().find_map(|(shape, extract)| {
        extract(payload)
            .filter(|points| !points.is_empty())
            .map(|points| (*shape, points))
    })?;

    match points
        .iter()
        .map(Landmark::deserialize)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(landmarks) => Some(SessionEvent::Pose(landmarks)),
        Err(e) => {
            warn!(shape, error = %e, "Malformed pose landmarks");
            None
        }
    }
}

type HoldsCallback = Arc<dyn Fn(&[Value]) + Send + Sync>;
type PoseCallback = Arc<dyn Fn(&[Landmark]) + Send + Sync>;

/// Callbacks for session updates; either may be left unset
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    on_holds: Option<HoldsCallback>,
    on_pose: Option<PoseCallback>,
}

impl SessionCallbacks {
    /// Empty callback set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the hold collection of each layout update
    #[must_use]
    pub fn on_holds<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.on_holds = Some(Arc::new(callback));
        self
    }

    /// Called with the landmarks of each pose update
    #[must_use]
    pub fn on_pose<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[Landmark]) + Send + Sync + 'static,
    {
        self.on_pose = Some(Arc::new(callback));
        self
    }

    /// Route one payload to at most one callback
    pub fn handle(&self, payload: &Value) {
        match route_payload(payload) {
            Some(SessionEvent::Holds(holds)) => {
                if let Some(callback) = &self.on_holds {
                    callback(&holds);
                }
            }
            Some(SessionEvent::Pose(landmarks)) => {
                if let Some(callback) = &self.on_pose {
                    callback(&landmarks);
                }
            }
            None => debug!("Session payload matched no known shape"),
        }
    }
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_holds", &self.on_holds.is_some())
            .field("on_pose", &self.on_pose.is_some())
            .finish()
    }
}

/// Endpoints used by the session adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoints {
    /// Session channel URL
    pub session: String,
    /// Default (preview) channel URL
    pub preview: String,
}

#[derive(Default)]
struct Wiring {
    subscription: Option<Subscription>,
    torn_down: bool,
}

/// Convenience layer over the registry for the session and preview channels
#[derive(Debug, Clone)]
pub struct SessionClient {
    registry: ConnectionRegistry,
    endpoints: SessionEndpoints,
}

impl SessionClient {
    /// Create an adapter over an existing registry
    pub const fn new(registry: ConnectionRegistry, endpoints: SessionEndpoints) -> Self {
        Self {
            registry,
            endpoints,
        }
    }

    /// Underlying registry
    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Configured endpoints
    #[must_use]
    pub const fn endpoints(&self) -> &SessionEndpoints {
        &self.endpoints
    }

    /// Open the session channel and route its payloads to `callbacks`
    ///
    /// The internal subscriber is re-registered after every reconnect. The
    /// returned handle tears the session down when closed or dropped.
    pub fn connect_session(&self, callbacks: SessionCallbacks) -> Result<SessionHandle, RegistryError> {
        let channel = ChannelId::session();
        self.registry.open(channel.clone(), &self.endpoints.session)?;

        let handler: Subscriber = subscriber(move |payload| {
            callbacks.handle(payload);
            Ok(())
        });

        let wiring = Arc::new(Mutex::new(Wiring {
            subscription: Some(self.registry.subscribe(&channel, Arc::clone(&handler))?),
            torn_down: false,
        }));

        let hook_wiring = Arc::clone(&wiring);
        let hook: OpenHook = Arc::new(move |registry: &ConnectionRegistry| {
            let mut wiring = hook_wiring.lock().unwrap_or_else(PoisonError::into_inner);
            if wiring.torn_down {
                return;
            }
            if wiring
                .subscription
                .as_ref()
                .is_some_and(|current| registry.is_subscribed(current))
            {
                return;
            }

            match registry.subscribe(&ChannelId::session(), Arc::clone(&handler)) {
                Ok(subscription) => {
                    debug!(subscription = %subscription.id, "Session handler re-subscribed");
                    wiring.subscription = Some(subscription);
                }
                Err(e) => warn!(error = %e, "Failed to re-subscribe session handler"),
            }
        });
        self.registry.on_open(&channel, hook)?;

        Ok(SessionHandle {
            registry: self.registry.clone(),
            wiring,
        })
    }

    /// Send a control action on the session channel
    pub fn send_session_action(&self, action: SessionAction) -> Result<SendOutcome, RegistryError> {
        self.registry
            .send(&ChannelId::session(), &OutboundCommand::Action { action })
    }

    /// Open the default channel used for previews
    pub fn connect_preview(&self) -> Result<(), RegistryError> {
        self.registry
            .open(ChannelId::default_channel(), &self.endpoints.preview)
    }

    /// Send a route preview on the default channel
    pub fn send_preview(&self, route: &Route) -> Result<SendOutcome, RegistryError> {
        self.registry
            .send(&ChannelId::default_channel(), &OutboundCommand::Preview { route })
    }
}

/// Live session wiring returned by [`SessionClient::connect_session`]
pub struct SessionHandle {
    registry: ConnectionRegistry,
    wiring: Arc<Mutex<Wiring>>,
}

impl SessionHandle {
    /// Current subscription of the session handler
    #[must_use]
    pub fn subscription(&self) -> Option<Subscription> {
        self.wiring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscription
            .clone()
    }

    /// Unsubscribe and close the session channel
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let subscription = {
            let mut wiring = self.wiring.lock().unwrap_or_else(PoisonError::into_inner);
            if wiring.torn_down {
                return;
            }
            wiring.torn_down = true;
            wiring.subscription.take()
        };

        if let Some(subscription) = subscription {
            self.registry.unsubscribe(&subscription);
        }
        self.registry.close(&ChannelId::session());
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("subscription", &self.subscription())
            .finish_non_exhaustive()
    }
}
