//! Notifications for conversations that are not open
//!
//! Messages arriving for a background conversation are kept newest first,
//! deduplicated by `(conversation, message)`. Each new one also raises a
//! flag telling the conversation list to refresh its previews.

use crate::storage::Message;
use std::collections::HashSet;
use tracing::debug;

/// A message waiting to be seen
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Conversation the message belongs to
    pub chat_id: String,
    /// The message itself
    pub message: Message,
}

/// Pending notifications, newest first
#[derive(Debug, Default)]
pub struct NotificationAggregator {
    entries: Vec<Notification>,
    seen: HashSet<(String, String)>,
    refresh: bool,
}

impl NotificationAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for a background conversation
    ///
    /// Returns false for repeats and for provisional messages, which are
    /// never recorded.
    pub fn record(&mut self, message: Message) -> bool {
        if message.is_pending() {
            return false;
        }
        let key = (message.chat_id().to_string(), message.id.clone());
        if !self.seen.insert(key) {
            return false;
        }

        debug!("Notification for {} in {}", message.id, message.chat_id());
        self.entries.insert(
            0,
            Notification {
                chat_id: message.chat_id().to_string(),
                message,
            },
        );
        self.refresh = true;
        true
    }

    /// Remove every notification of a conversation
    ///
    /// Dismissed messages may notify again if delivered again.
    pub fn dismiss(&mut self, chat_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|n| n.chat_id != chat_id);
        self.seen.retain(|(chat, _)| chat != chat_id);
        before - self.entries.len()
    }

    /// Number of pending notifications
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Number of pending notifications for one conversation
    pub fn count_for(&self, chat_id: &str) -> usize {
        self.entries.iter().filter(|n| n.chat_id == chat_id).count()
    }

    /// Pending notifications, newest first
    pub fn list(&self) -> &[Notification] {
        &self.entries
    }

    /// Read and reset the "refresh conversations" flag
    pub fn take_refresh(&mut self) -> bool {
        std::mem::take(&mut self.refresh)
    }

    /// Whether the conversation list should refresh
    pub fn needs_refresh(&self) -> bool {
        self.refresh
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
        self.refresh = false;
    }
}
