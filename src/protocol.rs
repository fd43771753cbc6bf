//! Protocol module
//!
//! This module defines the push channel protocol including:
//! - Event names exactly as they appear on the wire
//! - Socket.IO v4 packet framing over engine.io text frames
//! - Typed client-to-server and server-to-client events

use crate::storage::{Message, Participant};
use crate::{Error, Result};
use serde_json::Value;

/// Client registers the connection against the user
pub const EVENT_SETUP: &str = "setup";
/// Server acknowledges the `setup` registration
pub const EVENT_CONNECTED: &str = "connected";
/// Socket.IO connection acknowledgment, dispatched locally on the `40` packet
pub const EVENT_CONNECT: &str = "connect";
/// Client joins a conversation room
pub const EVENT_JOIN_CHAT: &str = "join chat";
/// Typing started in a conversation
pub const EVENT_TYPING: &str = "typing";
/// Typing stopped in a conversation
pub const EVENT_STOP_TYPING: &str = "stop typing";
/// Client asks the server to fan out a confirmed message
pub const EVENT_NEW_MESSAGE: &str = "new message";
/// Server delivers a message authored elsewhere (spelling is part of the wire format)
pub const EVENT_MESSAGE_RECEIVED: &str = "message recieved";
/// Server pushes the full roster of online users
pub const EVENT_ONLINE_USERS: &str = "getUsers";

/// A decoded engine.io / Socket.IO text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// engine.io open handshake (`0{...}`)
    Open(Value),
    /// engine.io close (`1`)
    Close,
    /// engine.io ping (`2`)
    Ping,
    /// engine.io pong (`3`)
    Pong,
    /// Socket.IO namespace connect (`40`)
    Connect,
    /// Socket.IO namespace disconnect (`41`)
    Disconnect,
    /// Socket.IO event (`42["name", payload]`)
    Event {
        /// Event name
        name: String,
        /// First event argument, `Null` when absent
        payload: Value,
    },
    /// Socket.IO connect error (`44{...}`)
    ConnectError(Value),
    /// Any other frame (acks, binary placeholders, noop, upgrade)
    Other(String),
}

impl Packet {
    /// Build an event packet
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            name: name.into(),
            payload,
        }
    }

    /// Encode into a text frame
    pub fn encode(&self) -> Result<String> {
        let frame = match self {
            Self::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Connect => "40".to_string(),
            Self::Disconnect => "41".to_string(),
            Self::Event { name, payload } => {
                let args = if payload.is_null() {
                    serde_json::json!([name])
                } else {
                    serde_json::json!([name, payload])
                };
                format!("42{}", serde_json::to_string(&args)?)
            }
            Self::ConnectError(data) => format!("44{}", serde_json::to_string(data)?),
            Self::Other(raw) => raw.clone(),
        };
        Ok(frame)
    }

    /// Decode a text frame
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let engine_type = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty frame".to_string()))?;
        let rest = chars.as_str();

        match engine_type {
            '0' => Ok(Self::Open(parse_json_or_null(rest)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => decode_socket_packet(rest),
            _ => Ok(Self::Other(frame.to_string())),
        }
    }
}

fn parse_json_or_null(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        Ok(Value::Null)
    } else {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("bad JSON in frame: {}", e)))
    }
}

/// Strip an optional `/namespace,` prefix and ack id digits
fn strip_namespace_and_ack(body: &str) -> &str {
    let body = if body.starts_with('/') {
        match body.find(',') {
            Some(comma) => &body[comma + 1..],
            None => "",
        }
    } else {
        body
    };
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn decode_socket_packet(rest: &str) -> Result<Packet> {
    let mut chars = rest.chars();
    let Some(socket_type) = chars.next() else {
        return Ok(Packet::Other(format!("4{}", rest)));
    };
    let body = chars.as_str();

    match socket_type {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let args: Vec<Value> = serde_json::from_str(strip_namespace_and_ack(body))
                .map_err(|e| Error::Protocol(format!("bad event arguments: {}", e)))?;
            let mut args = args.into_iter();
            let name = match args.next() {
                Some(Value::String(name)) => name,
                other => {
                    return Err(Error::Protocol(format!("event name missing: {:?}", other)));
                }
            };
            Ok(Packet::Event {
                name,
                payload: args.next().unwrap_or(Value::Null),
            })
        }
        '4' => Ok(Packet::ConnectError(parse_json_or_null(strip_namespace_and_ack(body))?)),
        _ => Ok(Packet::Other(format!("4{}", rest))),
    }
}

/// Events the client emits
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Register this connection for the user
    Setup(Participant),
    /// Subscribe to a conversation room
    JoinChat(String),
    /// Local user started typing in a conversation
    Typing(String),
    /// Local user stopped typing in a conversation
    StopTyping(String),
    /// Fan out a confirmed message to the other participants
    NewMessage(Message),
}

impl ClientEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup(_) => EVENT_SETUP,
            Self::JoinChat(_) => EVENT_JOIN_CHAT,
            Self::Typing(_) => EVENT_TYPING,
            Self::StopTyping(_) => EVENT_STOP_TYPING,
            Self::NewMessage(_) => EVENT_NEW_MESSAGE,
        }
    }

    /// JSON payload of the event
    pub fn payload(&self) -> Result<Value> {
        let value = match self {
            Self::Setup(identity) => serde_json::to_value(identity)?,
            Self::JoinChat(chat_id) | Self::Typing(chat_id) | Self::StopTyping(chat_id) => {
                Value::String(chat_id.clone())
            }
            Self::NewMessage(message) => serde_json::to_value(message)?,
        };
        Ok(value)
    }

    /// Frame the event as a Socket.IO packet
    pub fn to_packet(&self) -> Result<Packet> {
        Ok(Packet::event(self.name(), self.payload()?))
    }
}

/// A typing signal from another participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingNotice {
    /// Conversation the signal refers to
    pub chat_id: String,
    /// Typist, when the server names one
    pub participant_id: Option<String>,
}

impl TypingNotice {
    /// Accepts a bare chat id or an object with `chatId`/`room` and `userId`/`user`
    fn from_payload(payload: &Value) -> Result<Self> {
        match payload {
            Value::String(chat_id) => Ok(Self {
                chat_id: chat_id.clone(),
                participant_id: None,
            }),
            Value::Object(fields) => {
                let chat_id = ["chatId", "room", "chat"]
                    .iter()
                    .find_map(|k| fields.get(*k).and_then(Value::as_str))
                    .ok_or_else(|| Error::Protocol("typing payload without chat id".to_string()))?;
                let participant_id = ["userId", "user"]
                    .iter()
                    .find_map(|k| fields.get(*k).and_then(Value::as_str))
                    .map(str::to_string);
                Ok(Self {
                    chat_id: chat_id.to_string(),
                    participant_id,
                })
            }
            other => Err(Error::Protocol(format!("unexpected typing payload: {}", other))),
        }
    }
}

/// Events the server pushes
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Connection acknowledged (`connect` or `connected`)
    Connected,
    /// A message authored elsewhere
    MessageReceived(Message),
    /// A participant started typing
    Typing(TypingNotice),
    /// A participant stopped typing
    StopTyping(TypingNotice),
    /// Full roster of online participant ids
    OnlineUsers(Vec<String>),
}

impl ServerEvent {
    /// Decode a named event
    ///
    /// Returns `Ok(None)` for event names this client does not handle.
    pub fn from_wire(name: &str, payload: Value) -> Result<Option<Self>> {
        let event = match name {
            EVENT_CONNECT | EVENT_CONNECTED => Self::Connected,
            EVENT_MESSAGE_RECEIVED => {
                let message: Message = serde_json::from_value(payload)
                    .map_err(|e| Error::Protocol(format!("bad message payload: {}", e)))?;
                Self::MessageReceived(message)
            }
            EVENT_TYPING => Self::Typing(TypingNotice::from_payload(&payload)?),
            EVENT_STOP_TYPING => Self::StopTyping(TypingNotice::from_payload(&payload)?),
            EVENT_ONLINE_USERS => Self::OnlineUsers(roster_ids(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Roster entries may be plain ids or objects with `userId`/`_id`; others are skipped
fn roster_ids(payload: Value) -> Result<Vec<String>> {
    let entries = match payload {
        Value::Array(entries) => entries,
        other => return Err(Error::Protocol(format!("roster is not an array: {}", other))),
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(id) => Some(id),
            Value::Object(fields) => ["userId", "_id", "id"]
                .iter()
                .find_map(|k| fields.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .collect())
}
