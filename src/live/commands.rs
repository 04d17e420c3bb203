// ABOUTME: Outbound command frames for the session and preview channels

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Route;

/// Control action for the running wall session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    /// Restart the current attempt
    Restart,
    /// Replay the recorded attempt
    Relay,
    /// Pause the session
    Pause,
}

impl SessionAction {
    /// Wire name of the action
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Relay => "relay",
            Self::Pause => "pause",
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown session action name
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown session action '{0}' (expected restart, relay or pause)")]
pub struct ParseActionError(String);

impl FromStr for SessionAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" => Ok(Self::Restart),
            "relay" => Ok(Self::Relay),
            "pause" => Ok(Self::Pause),
            _ => Err(ParseActionError(s.to_string())),
        }
    }
}

/// Tagged command frame sent to the wall server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundCommand<'a> {
    /// Session control, sent on the session channel
    Action {
        /// Requested action
        action: SessionAction,
    },
    /// Route preview, sent on the default channel
    Preview {
        /// Route to light up on the wall
        route: &'a Route,
    },
}
