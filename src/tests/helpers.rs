//! Shared test helpers: an in-process push server and a scriptable API

use crate::api::ChatApi;
use crate::protocol::Packet;
use crate::session::ChatSession;
use crate::storage::{Chat, Message, Participant, SessionIdentity, Settings};
use crate::transport::{Connection, Link};
use crate::{Error, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Identity used by every session under test
pub fn identity() -> SessionIdentity {
    SessionIdentity::new("me", "Me", "secret")
}

/// Let spawned tasks run without advancing a paused clock
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

/// Server end of a link, speaking just enough Socket.IO
pub struct FakeServer {
    link: Link,
}

impl FakeServer {
    /// Wrap the server end of a link pair
    pub fn new(link: Link) -> Self {
        Self { link }
    }

    /// Open the engine and acknowledge the namespace
    pub async fn handshake(&mut self) {
        self.send(r#"0{"sid":"test","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#);
        assert_eq!(self.recv_frame().await, "40");
        self.send("40");
    }

    /// Send a raw frame
    pub fn send(&self, frame: &str) {
        self.link.send(frame).expect("Failed to send frame");
    }

    /// Push an event to the client
    pub fn push(&self, name: &str, payload: Value) {
        let frame = Packet::event(name, payload).encode().expect("Failed to encode event");
        self.send(&frame);
    }

    /// Next frame from the client
    pub async fn recv_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(1), self.link.recv())
            .await
            .expect("Timed out waiting for frame")
            .expect("Link closed")
    }

    /// Next event from the client, skipping control frames
    pub async fn next_event(&mut self) -> (String, Value) {
        loop {
            let frame = self.recv_frame().await;
            if let Ok(Packet::Event { name, payload }) = Packet::decode(&frame) {
                return (name, payload);
            }
        }
    }

    /// Every frame already sent by the client
    pub fn drain_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = self.link.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Every event already sent by the client
    pub fn drain_events(&mut self) -> Vec<(String, Value)> {
        self.drain_frames()
            .into_iter()
            .filter_map(|frame| match Packet::decode(&frame) {
                Ok(Packet::Event { name, payload }) => Some((name, payload)),
                _ => None,
            })
            .collect()
    }

    /// Names of every event already sent by the client
    pub fn drain_event_names(&mut self) -> Vec<String> {
        self.drain_events().into_iter().map(|(name, _)| name).collect()
    }
}

/// A connection that has completed the handshake and sent `setup`
pub async fn connected(identity: &SessionIdentity) -> (Connection, FakeServer) {
    let (client, server) = Link::pair();
    let connection = Connection::attach(client, identity);
    let mut server = FakeServer::new(server);
    server.handshake().await;

    let (name, _) = server.next_event().await;
    assert_eq!(name, "setup");
    settle().await;
    (connection, server)
}

/// A session over a connected push channel and the given API
pub async fn start_session(api: FakeApi) -> (ChatSession<FakeApi>, FakeServer) {
    let identity = identity();
    let (connection, server) = connected(&identity).await;
    let session = ChatSession::start(api, connection, identity, Settings::default());
    settle().await;
    (session, server)
}

/// A confirmed message from another participant
pub fn incoming(id: &str, chat_id: &str, content: &str) -> Message {
    Message::new(id, chat_id, Participant::new("u2", "Kamala"), content, Utc::now())
}

/// Failure modes of the fake API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Non-success status
    Server,
    /// 401
    Unauthorized,
}

impl Failure {
    fn to_error(self) -> Error {
        match self {
            Self::Server => Error::Api("fake server error".to_string()),
            Self::Unauthorized => Error::Unauthorized,
        }
    }
}

#[derive(Default)]
struct FakeApiState {
    messages: Mutex<HashMap<String, Vec<Message>>>,
    conversations: Mutex<Vec<Chat>>,
    fetch_gates: Mutex<HashMap<String, Arc<Notify>>>,
    fetch_failure: Mutex<Option<Failure>>,
    send_gate: Mutex<Option<Arc<Notify>>>,
    send_failure: Mutex<Option<Failure>>,
    confirm_ids: Mutex<VecDeque<String>>,
    sent: Mutex<Vec<(String, String)>>,
    fetches: AtomicUsize,
}

/// In-memory `ChatApi` whose calls can be held back or failed
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<FakeApiState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("Fake API lock poisoned")
}

impl FakeApi {
    /// Create an API with no data
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages returned for a conversation
    pub fn set_messages(&self, chat_id: &str, messages: Vec<Message>) {
        lock(&self.state.messages).insert(chat_id.to_string(), messages);
    }

    /// Conversations returned by the list call
    pub fn set_conversations(&self, conversations: Vec<Chat>) {
        *lock(&self.state.conversations) = conversations;
    }

    /// Hold the next fetch of `chat_id` until the returned gate is notified
    pub fn gate_fetch(&self, chat_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.state.fetch_gates).insert(chat_id.to_string(), Arc::clone(&gate));
        gate
    }

    /// Make fetches fail, or succeed again with `None`
    pub fn fail_fetch(&self, failure: Option<Failure>) {
        *lock(&self.state.fetch_failure) = failure;
    }

    /// Hold every send until the returned gate is notified, once per send
    pub fn gate_send(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.state.send_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Make sends fail, or succeed again with `None`
    pub fn fail_send(&self, failure: Option<Failure>) {
        *lock(&self.state.send_failure) = failure;
    }

    /// Ids handed to the next confirmed messages, in order
    pub fn confirm_with(&self, ids: &[&str]) {
        lock(&self.state.confirm_ids).extend(ids.iter().map(|id| id.to_string()));
    }

    /// `(chat_id, content)` of every send issued
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.state.sent).clone()
    }

    /// Number of message fetches issued
    pub fn fetch_count(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }
}

impl ChatApi for FakeApi {
    async fn fetch_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.state.fetch_gates).remove(chat_id);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failure = *lock(&self.state.fetch_failure);
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }
        let messages = lock(&self.state.messages).get(chat_id).cloned().unwrap_or_default();
        Ok(messages)
    }

    async fn send_message(&self, chat_id: &str, content: &str) -> Result<Message> {
        let sequence = {
            let mut sent = lock(&self.state.sent);
            sent.push((chat_id.to_string(), content.to_string()));
            sent.len()
        };
        let gate = lock(&self.state.send_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failure = *lock(&self.state.send_failure);
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }
        let id = lock(&self.state.confirm_ids)
            .pop_front()
            .unwrap_or_else(|| format!("srv-{}", sequence));
        Ok(Message::new(id, chat_id, Participant::new("me", "Me"), content, Utc::now()))
    }

    async fn fetch_conversations(&self) -> Result<Vec<Chat>> {
        let failure = *lock(&self.state.fetch_failure);
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }
        let conversations = lock(&self.state.conversations).clone();
        Ok(conversations)
    }
}
