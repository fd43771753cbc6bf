//! chatsync - real-time chat synchronization core
//!
//! This library keeps a conversation's message list consistent across a push
//! channel and a periodic REST re-fetch, reconciles optimistic sends with the
//! server-confirmed copies, debounces typing signals, aggregates notifications
//! for background conversations and tracks online presence.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod messaging;
pub mod notifications;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod tui;
pub mod typing;

#[cfg(test)]
mod tests;

/// Result type alias for chatsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for chatsync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Push channel error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed frame or payload on the push channel or REST API
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// REST call answered with a non-success status
    #[error("API error: {0}")]
    Api(String),

    /// REST call answered 401 or credentials are missing
    #[error("Session expired or unauthorized")]
    Unauthorized,

    /// Submit with blank compose content
    #[error("Message content is empty")]
    EmptyMessage,

    /// Operation needs an open conversation
    #[error("No conversation is open")]
    NoActiveConversation,

    /// A send is still unresolved in this conversation
    #[error("A message is already being sent in conversation {0}")]
    SendInFlight(String),

    /// A background task panicked or was aborted before finishing
    #[error("Task error: {0}")]
    Task(String),

    /// Settings could not be read, parsed or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Initialize the chatsync library with logging
pub fn init() {
    tracing_subscriber::fmt::init();
}
