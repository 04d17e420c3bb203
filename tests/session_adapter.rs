// ABOUTME: Integration tests for the session adapter: payload routing, re-subscription after reconnect and teardown

mod helpers;

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use wall_live::live::{
    ChannelId, ConnectionRegistry, Landmark, ReconnectPolicy, SendOutcome, SessionAction,
    SessionCallbacks, SessionClient, SessionEndpoints,
};
use wall_live::models::Route;

use helpers::advance_ms;
use helpers::fake_transport::FakeTransport;

#[derive(Default)]
struct Recorded {
    holds: Vec<Vec<Value>>,
    poses: Vec<Vec<Landmark>>,
}

fn client_with(transport: &Arc<FakeTransport>) -> SessionClient {
    let registry = ConnectionRegistry::create(transport.clone(), ReconnectPolicy::default());
    SessionClient::new(
        registry,
        SessionEndpoints {
            session: "wss://wall.test/ws/holds/".to_string(),
            preview: "wss://wall.test/ws/".to_string(),
        },
    )
}

fn recording_callbacks() -> (SessionCallbacks, Arc<Mutex<Recorded>>) {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let holds = Arc::clone(&recorded);
    let poses = Arc::clone(&recorded);
    let callbacks = SessionCallbacks::new()
        .on_holds(move |h| holds.lock().unwrap().holds.push(h.to_vec()))
        .on_pose(move |p| poses.lock().unwrap().poses.push(p.to_vec()));
    (callbacks, recorded)
}

fn sample_route() -> Route {
    serde_json::from_value(json!({
        "id": 42,
        "name": "Crimp line",
        "data": {
            "grade": "7a",
            "author": "Trinity",
            "problem": {
                "holds": [
                    { "id": "3", "type": "start", "next": 8, "hand": "l" },
                    { "id": "8", "type": "finish" }
                ]
            }
        }
    }))
    .unwrap()
}

// ==== Routing Tests ====

#[tokio::test]
async fn test_payloads_reach_the_matching_callback() {
    let transport = FakeTransport::new();
    let client = client_with(&transport);
    let (callbacks, recorded) = recording_callbacks();
    let _handle = client.connect_session(callbacks).unwrap();
    let link = transport.last();
    link.open();

    link.message(&json!([{"x": 0.1, "y": 0.2}, {"x": 0.3, "y": 0.4}]));
    link.message(&json!({"pose_landmarks": []}));
    link.message(&json!({"session": {"holds": [{"id": "5"}]}}));
    link.message(&json!({"landmarks": [{"x": 1, "y": 1, "visibility": 0.8}]}));

    let recorded = recorded.lock().unwrap();
    assert_eq!(recorded.holds, vec![vec![json!({"id": "5"})]]);
    assert_eq!(recorded.poses.len(), 2);
    assert_eq!(recorded.poses[0].len(), 2);
    assert_eq!(recorded.poses[1][0].visibility, Some(0.8));
}

// ==== Reconnect Tests ====

#[tokio::test(start_paused = true)]
async fn test_session_handler_resubscribes_after_reconnect() {
    let transport = FakeTransport::new();
    let client = client_with(&transport);
    let (callbacks, recorded) = recording_callbacks();
    let handle = client.connect_session(callbacks).unwrap();
    let session = ChannelId::session();
    transport.last().open();
    let original = handle.subscription().unwrap();

    transport.last().drop_with(1006);
    advance_ms(2000).await;
    assert_eq!(transport.connection_count(), 2);
    assert_eq!(client.registry().subscriber_count(&session), 0);

    transport.last().open();
    assert_eq!(client.registry().subscriber_count(&session), 1);
    let renewed = handle.subscription().unwrap();
    assert_ne!(renewed, original);
    assert!(client.registry().is_subscribed(&renewed));

    transport.last().message(&json!({"session": {"holds": []}}));
    assert_eq!(recorded.lock().unwrap().holds, vec![Vec::<Value>::new()]);
}

#[tokio::test(start_paused = true)]
async fn test_reopen_does_not_double_subscribe() {
    let transport = FakeTransport::new();
    let client = client_with(&transport);
    let (callbacks, recorded) = recording_callbacks();
    let _handle = client.connect_session(callbacks).unwrap();

    transport.last().open();
    transport.last().open();
    transport.last().message(&json!({"pose": [{"x": 0, "y": 0}]}));

    assert_eq!(client.registry().subscriber_count(&ChannelId::session()), 1);
    assert_eq!(recorded.lock().unwrap().poses.len(), 1);
}

// ==== Teardown Tests ====

#[tokio::test]
async fn test_close_unsubscribes_and_closes_session() {
    let transport = FakeTransport::new();
    let client = client_with(&transport);
    let (callbacks, recorded) = recording_callbacks();
    let handle = client.connect_session(callbacks).unwrap();
    let link = transport.last();
    link.open();

    handle.close();

    assert!(!client.registry().contains(&ChannelId::session()));
    assert_eq!(link.closed_with().map(|(code, _)| code), Some(1000));
    link.message(&json!({"session": {"holds": [{"id": "1"}]}}));
    assert!(recorded.lock().unwrap().holds.is_empty());
}

#[tokio::test]
async fn test_dropping_handle_tears_down() {
    let transport = FakeTransport::new();
    let client = client_with(&transport);
    {
        let _handle = client.connect_session(SessionCallbacks::new()).unwrap();
        assert!(client.registry().contains(&ChannelId::session()));
    }

    assert!(!client.registry().contains(&ChannelId::session()));
    assert!(transport.last().closed_with().is_some());
}

// ==== Outbound Command Tests ====

#[tokio::test]
async fn test_action_is_sent_on_session_channel() {
    let transport = FakeTransport::new();
    let client = client_with(&transport);
    let _handle = client.connect_session(SessionCallbacks::new()).unwrap();

    let early = client.send_session_action(SessionAction::Pause).unwrap();
    assert_eq!(early, SendOutcome::Dropped);

    transport.last().open();
    let outcome = client.send_session_action(SessionAction::Restart).unwrap();

    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(
        transport.last().sent(),
        vec![json!({"type": "action", "action": "restart"})]
    );
}

#[tokio::test]
async fn test_preview_uses_default_channel() {
    let transport = FakeTransport::new();
    let client = client_with(&transport);
    client.connect_preview().unwrap();
    client.connect_preview().unwrap();
    assert_eq!(transport.connection_count(), 1);

    let link = transport.last_to("/ws/");
    link.open();
    let outcome = client.send_preview(&sample_route()).unwrap();

    assert_eq!(outcome, SendOutcome::Sent);
    let sent = link.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "preview");
    assert_eq!(sent[0]["route"]["name"], "Crimp line");
    assert_eq!(sent[0]["route"]["data"]["problem"]["holds"][0]["hand"], "l");
    assert!(client.registry().contains(&ChannelId::default_channel()));
    assert!(!client.registry().contains(&ChannelId::session()));
}
