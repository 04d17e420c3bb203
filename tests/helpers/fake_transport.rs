// ABOUTME: In-memory transport for driving the connection registry from tests
//
// Every successful connect produces a FakeLink. Tests use the link to play the
// server side: complete the handshake, push frames, drop the connection with a
// close code, and inspect what the client sent or how it closed.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use url::Url;
use wall_live::live::{Connection, EventSink, ReadyState, Transport, TransportError};

#[derive(Debug, Default)]
struct LinkState {
    ready: Option<ReadyState>,
    sent: Vec<String>,
    closed_with: Option<(u16, String)>,
}

/// Server-side view of one fake connection
#[derive(Clone)]
pub struct FakeLink {
    pub endpoint: Url,
    sink: EventSink,
    state: Arc<Mutex<LinkState>>,
}

impl FakeLink {
    fn set_ready(&self, ready: ReadyState) {
        self.state.lock().unwrap().ready = Some(ready);
    }

    /// Complete the handshake
    pub fn open(&self) {
        self.set_ready(ReadyState::Open);
        self.sink.opened();
    }

    /// Push a JSON frame
    pub fn message(&self, payload: &Value) {
        self.sink.message(payload.to_string());
    }

    /// Push a raw text frame
    pub fn raw(&self, text: &str) {
        self.sink.message(text);
    }

    /// Terminate from the server side with `code`
    pub fn drop_with(&self, code: u16) {
        self.set_ready(ReadyState::Closed);
        self.sink.closed(code, "");
    }

    /// Frames the client sent, decoded
    pub fn sent(&self) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// Close code and reason if the client closed this link
    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.state.lock().unwrap().closed_with.clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.lock().unwrap().ready.unwrap_or(ReadyState::Connecting)
    }
}

struct FakeConnection {
    state: Arc<Mutex<LinkState>>,
}

impl Connection for FakeConnection {
    fn ready_state(&self) -> ReadyState {
        self.state.lock().unwrap().ready.unwrap_or(ReadyState::Connecting)
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.ready != Some(ReadyState::Open) {
            return Err(TransportError::NotOpen);
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.ready = Some(ReadyState::Closed);
        state.closed_with = Some((code, reason.to_string()));
    }
}

#[derive(Default)]
struct Inner {
    links: Vec<FakeLink>,
    connect_calls: usize,
    fail_next: usize,
}

/// Transport that records every connection it hands out
#[derive(Default)]
pub struct FakeTransport {
    inner: Mutex<Inner>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` connect calls fail
    pub fn fail_next_connects(&self, count: usize) {
        self.inner.lock().unwrap().fail_next = count;
    }

    /// Successful connections so far
    pub fn connection_count(&self) -> usize {
        self.inner.lock().unwrap().links.len()
    }

    /// Connect calls so far, including failed ones
    pub fn connect_calls(&self) -> usize {
        self.inner.lock().unwrap().connect_calls
    }

    pub fn link(&self, index: usize) -> FakeLink {
        self.inner.lock().unwrap().links[index].clone()
    }

    pub fn last(&self) -> FakeLink {
        self.inner
            .lock()
            .unwrap()
            .links
            .last()
            .cloned()
            .expect("no connection was made")
    }

    /// Most recent link made to an endpoint whose path ends with `suffix`
    pub fn last_to(&self, suffix: &str) -> FakeLink {
        self.inner
            .lock()
            .unwrap()
            .links
            .iter()
            .rev()
            .find(|link| link.endpoint.path().ends_with(suffix))
            .cloned()
            .expect("no connection to endpoint")
    }
}

impl Transport for FakeTransport {
    fn connect(&self, endpoint: &Url, events: EventSink) -> Result<Box<dyn Connection>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connect_calls += 1;
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(TransportError::ConnectFailed("refused by test".to_string()));
        }

        let state = Arc::new(Mutex::new(LinkState::default()));
        inner.links.push(FakeLink {
            endpoint: endpoint.clone(),
            sink: events,
            state: Arc::clone(&state),
        });
        Ok(Box::new(FakeConnection { state }))
    }
}
