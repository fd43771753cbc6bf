//! Push channel transport module
//!
//! This module handles the live event channel including:
//! - One Socket.IO connection per session, bridged onto a WebSocket
//! - Buffering of events emitted before the server acknowledges the connection
//! - Named and typed subscriptions, dropped on disconnect
//! - Connection status tracking so callers can fall back to REST-only mode
//!
//! Reconnection is left to the channel implementation; a lost channel simply
//! reports `Disconnected`.

use crate::protocol::{ClientEvent, Packet, ServerEvent, EVENT_CONNECT};
use crate::storage::SessionIdentity;
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// Callback type for named events, receives the raw JSON payload
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback type for decoded server events
pub type ServerEventHandler = Arc<dyn Fn(ServerEvent) + Send + Sync>;

/// State of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Socket opening or waiting for the server acknowledgment
    Connecting,
    /// Server acknowledged the connection
    Connected,
    /// Channel closed, failed or was disconnected locally
    Disconnected,
}

/// Handle returned by `on`/`on_event`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A duplex of text frames
///
/// `Connection::connect` bridges one end onto a WebSocket; tests and
/// in-process peers can hold the other end of `Link::pair` directly.
#[derive(Debug)]
pub struct Link {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl Link {
    /// Create a link from raw channel halves
    pub fn new(
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self { inbound, outbound }
    }

    /// Create two connected ends: frames sent on one are received on the other
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_rx, b_tx), Self::new(b_rx, a_tx))
    }

    /// Receive the next frame; `None` once the other end is gone
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Receive a frame if one is already queued
    pub fn try_recv(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }

    /// Send a frame to the other end
    pub fn send(&self, frame: impl Into<String>) -> Result<()> {
        self.outbound
            .send(frame.into())
            .map_err(|_| Error::Transport("link peer has gone away".to_string()))
    }
}

enum Outbound {
    Frame(String),
    Close,
}

#[derive(Default)]
struct Registry {
    named: Vec<(u64, String, EventHandler)>,
    typed: Vec<(u64, ServerEventHandler)>,
}

struct Inner {
    outbox: mpsc::UnboundedSender<Outbound>,
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    closed: AtomicBool,
    status: watch::Sender<ConnectionStatus>,
}

impl Inner {
    /// Invoke every handler subscribed to `name`
    ///
    /// The registry read lock is held while handlers run, so `disconnect`
    /// returns only after in-flight callbacks have finished.
    fn dispatch(&self, name: &str, payload: Value) {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        for (_, event, handler) in registry.named.iter() {
            if event == name {
                handler(&payload);
            }
        }

        if registry.typed.is_empty() {
            return;
        }
        match ServerEvent::from_wire(name, payload) {
            Ok(Some(event)) => {
                for (_, handler) in registry.typed.iter() {
                    handler(event.clone());
                }
            }
            Ok(None) => debug!("Unhandled push event '{}'", name),
            Err(e) => warn!("Dropping malformed '{}' event: {}", name, e),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        if status == ConnectionStatus::Connected && self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.status.send_replace(status);
    }
}

/// Live push channel for one session
///
/// Cloning yields another handle to the same connection.
///
/// Handlers run on the channel's pump task and must not subscribe,
/// unsubscribe or disconnect from inside the callback.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Open a Socket.IO connection over WebSocket and register the session
    ///
    /// Returns immediately; the socket opens in the background. Must be
    /// called from within a tokio runtime. `https` URLs are dialed over TLS.
    ///
    /// # Errors
    /// `Config` when `url` is not an http(s) or ws(s) URL.
    pub fn connect(url: &str, identity: &SessionIdentity) -> Result<Self> {
        let endpoint = socket_endpoint(url)?;
        let (client_side, socket_side) = Link::pair();
        let connection = Self::attach(client_side, identity);

        info!("Opening push channel to {}", endpoint);
        tokio::spawn(bridge_websocket(endpoint, socket_side));

        Ok(connection)
    }

    /// Run the protocol over an existing link and register the session
    ///
    /// `setup` is emitted immediately and buffered until the server
    /// acknowledges the connection.
    pub fn attach(link: Link, identity: &SessionIdentity) -> Self {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Connecting);

        let inner = Arc::new(Inner {
            outbox,
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            status,
        });

        tokio::spawn(run_pump(Arc::downgrade(&inner), link, outbox_rx));

        let connection = Self { inner };
        if let Err(e) = connection.emit(ClientEvent::Setup(identity.participant())) {
            warn!("Failed to queue setup event: {}", e);
        }
        connection
    }

    /// Emit a typed event
    ///
    /// Never waits for the connection: frames emitted before the server
    /// acknowledgment are buffered and flushed in order.
    pub fn emit(&self, event: ClientEvent) -> Result<()> {
        let frame = event.to_packet()?.encode()?;
        debug!("Emitting '{}'", event.name());
        self.send_frame(frame)
    }

    /// Emit an event by name with an arbitrary payload
    pub fn emit_raw(&self, name: &str, payload: Value) -> Result<()> {
        let frame = Packet::event(name, payload).encode()?;
        debug!("Emitting '{}'", name);
        self.send_frame(frame)
    }

    fn send_frame(&self, frame: String) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection is closed".to_string()));
        }
        self.inner
            .outbox
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::Transport("push channel has stopped".to_string()))
    }

    /// Subscribe to a named event
    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut registry = self.inner.registry.write().unwrap_or_else(PoisonError::into_inner);
        if !self.inner.closed.load(Ordering::SeqCst) {
            registry.named.push((id, event.to_string(), Arc::new(handler)));
        }
        SubscriptionId(id)
    }

    /// Subscribe to every event this client understands, decoded
    pub fn on_event<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut registry = self.inner.registry.write().unwrap_or_else(PoisonError::into_inner);
        if !self.inner.closed.load(Ordering::SeqCst) {
            registry.typed.push((id, Arc::new(handler)));
        }
        SubscriptionId(id)
    }

    /// Remove a subscription
    pub fn off(&self, subscription: SubscriptionId) {
        let mut registry = self.inner.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.named.retain(|(id, _, _)| *id != subscription.0);
        registry.typed.retain(|(id, _)| *id != subscription.0);
    }

    /// Current channel status
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Whether the server has acknowledged the connection
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Watch status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Close the channel
    ///
    /// Frames emitted before this call are still flushed. After it returns
    /// no subscription callback is invoked again.
    pub fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut registry = self.inner.registry.write().unwrap_or_else(PoisonError::into_inner);
            registry.named.clear();
            registry.typed.clear();
        }
        let _ = self.inner.outbox.send(Outbound::Close);
        self.inner.status.send_replace(ConnectionStatus::Disconnected);
        info!("Push channel disconnected");
    }
}

fn send_packet(link: &Link, packet: &Packet) -> bool {
    match packet.encode() {
        Ok(frame) => link.outbound.send(frame).is_ok(),
        Err(e) => {
            warn!("Dropping unencodable packet: {}", e);
            true
        }
    }
}

/// Drive the protocol: answer handshakes, flush buffered emits, dispatch events
async fn run_pump(
    inner: Weak<Inner>,
    mut link: Link,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut connected = false;
    let mut pending: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            frame = link.inbound.recv() => {
                let Some(frame) = frame else {
                    info!("Push channel closed; continuing in REST-only mode");
                    break;
                };
                let Some(inner) = inner.upgrade() else { break };

                match Packet::decode(&frame) {
                    Ok(Packet::Open(handshake)) => {
                        debug!("Engine handshake: {}", handshake);
                        if !send_packet(&link, &Packet::Connect) {
                            break;
                        }
                    }
                    Ok(Packet::Ping) => {
                        if !send_packet(&link, &Packet::Pong) {
                            break;
                        }
                    }
                    Ok(Packet::Connect) => {
                        connected = true;
                        inner.set_status(ConnectionStatus::Connected);
                        info!("Push channel connected, flushing {} buffered event(s)", pending.len());
                        let mut flushed = true;
                        for buffered in pending.drain(..) {
                            if link.outbound.send(buffered).is_err() {
                                flushed = false;
                                break;
                            }
                        }
                        if !flushed {
                            break;
                        }
                        inner.dispatch(EVENT_CONNECT, Value::Null);
                    }
                    Ok(Packet::Event { name, payload }) => inner.dispatch(&name, payload),
                    Ok(Packet::Disconnect) | Ok(Packet::Close) => {
                        info!("Push channel closed by server");
                        break;
                    }
                    Ok(Packet::ConnectError(reason)) => {
                        error!("Push channel refused connection: {}", reason);
                        break;
                    }
                    Ok(other) => debug!("Ignoring frame {:?}", other),
                    Err(e) => warn!("Ignoring malformed frame: {}", e),
                }
            }
            outgoing = outbox.recv() => match outgoing {
                Some(Outbound::Frame(frame)) => {
                    if connected {
                        if link.outbound.send(frame).is_err() {
                            break;
                        }
                    } else {
                        pending.push(frame);
                    }
                }
                Some(Outbound::Close) | None => {
                    if connected {
                        let _ = send_packet(&link, &Packet::Disconnect);
                    }
                    break;
                }
            }
        }
    }

    if !pending.is_empty() {
        debug!("Dropped {} event(s) that were never flushed", pending.len());
    }
    if let Some(inner) = inner.upgrade() {
        inner.status.send_replace(ConnectionStatus::Disconnected);
    }
}

/// Forward frames between a link and a WebSocket until either side closes
async fn bridge_websocket(endpoint: String, mut link: Link) {
    let stream = match connect_async(endpoint.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            error!("Push channel connection to {} failed: {}", endpoint, e);
            return;
        }
    };
    info!("Push channel socket open: {}", endpoint);

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            frame = link.inbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        warn!("Push channel write failed: {}", e);
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if link.outbound.send(text).is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!("Push channel socket closed by server: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Push channel read failed: {}", e);
                    break;
                }
                None => break,
            }
        }
    }
}

/// Socket.IO WebSocket endpoint for a server base URL
///
/// `http` maps to `ws` and `https` to `wss`. URLs that already name a
/// `/socket.io/` path are only rewritten in their scheme.
pub fn socket_endpoint(url: &str) -> Result<String> {
    let mut endpoint = Url::parse(url)
        .map_err(|e| Error::Config(format!("Invalid push channel URL '{}': {}", url, e)))?;
    let scheme = match endpoint.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(Error::Config(format!(
                "Unsupported push channel scheme '{}' in '{}'",
                other, url
            )));
        }
    };
    endpoint
        .set_scheme(scheme)
        .map_err(|_| Error::Config(format!("Cannot use '{}' over {}", url, scheme)))?;

    if !endpoint.path().contains("/socket.io/") {
        let path = format!("{}/socket.io/", endpoint.path().trim_end_matches('/'));
        endpoint.set_path(&path);
        endpoint.set_query(Some("EIO=4&transport=websocket"));
    }
    Ok(endpoint.to_string())
}
