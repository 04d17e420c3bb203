// ABOUTME: CLI watch command - stream hold and pose updates from the live session
//
// Runs until Ctrl-C, until --max-events updates were printed, or until the
// session channel gives up reconnecting.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use super::util::build_client;
use super::{OutputFormat, WatchArgs};
use crate::config::LiveConfig;
use crate::live::{ChannelId, Landmark, SessionCallbacks};

const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

/// One printed update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WatchEvent {
    Holds { holds: Vec<Value> },
    Pose { landmarks: Vec<Landmark> },
}

impl WatchEvent {
    /// One-line summary for text output
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Holds { holds } => {
                let ids: Vec<String> = holds
                    .iter()
                    .map(|hold| match hold.get("id") {
                        Some(Value::String(id)) => id.clone(),
                        Some(other) => other.to_string(),
                        None => "?".to_string(),
                    })
                    .collect();
                format!("holds  {} [{}]", holds.len(), ids.join(", "))
            }
            Self::Pose { landmarks } => {
                let visible = landmarks
                    .iter()
                    .filter(|l| l.visibility.map_or(true, |v| v >= 0.5))
                    .count();
                format!("pose   {} landmarks ({visible} visible)", landmarks.len())
            }
        }
    }
}

/// Execute the watch command
pub async fn execute(args: WatchArgs, format: OutputFormat, config: &LiveConfig) -> Result<()> {
    let client = build_client(config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let pose_tx = tx.clone();

    let callbacks = SessionCallbacks::new()
        .on_holds(move |holds| {
            let _ = tx.send(WatchEvent::Holds {
                holds: holds.to_vec(),
            });
        })
        .on_pose(move |landmarks| {
            let _ = pose_tx.send(WatchEvent::Pose {
                landmarks: landmarks.to_vec(),
            });
        });

    let handle = client
        .connect_session(callbacks)
        .context("Failed to connect the session channel")?;
    info!(endpoint = %config.session.endpoint, "Watching live session");

    let session = ChannelId::session();
    let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
    let mut printed = 0usize;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break Ok(()) };
                if let Err(e) = print_event(&event, format) {
                    break Err(e);
                }
                printed += 1;
                if args.max_events.is_some_and(|max| printed >= max) {
                    break Ok(());
                }
            }
            _ = liveness.tick() => {
                if !client.registry().contains(&session) {
                    break Err(anyhow!("Session channel closed and will not reconnect"));
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted, closing session");
                break Ok(());
            }
        }
    };

    handle.close();
    client.registry().dispose_all();
    result
}

fn print_event(event: &WatchEvent, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Text => println!("{}", event.summary()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_holds_summary_lists_ids() {
        let event = WatchEvent::Holds {
            holds: vec![json!({"id": "5"}), json!({"id": 12}), json!({})],
        };

        assert_eq!(event.summary(), "holds  3 [5, 12, ?]");
    }

    #[test]
    fn test_pose_summary_counts_visible() {
        let event = WatchEvent::Pose {
            landmarks: vec![
                Landmark { x: 0.0, y: 0.0, z: None, visibility: Some(0.9) },
                Landmark { x: 1.0, y: 1.0, z: None, visibility: Some(0.1) },
                Landmark { x: 2.0, y: 2.0, z: None, visibility: None },
            ],
        };

        assert_eq!(event.summary(), "pose   3 landmarks (2 visible)");
    }

    #[test]
    fn test_json_event_is_tagged() {
        let event = WatchEvent::Holds { holds: vec![] };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"kind": "holds", "holds": []})
        );
    }
}
