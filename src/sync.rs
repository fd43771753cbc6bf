//! Message synchronization module
//!
//! This module merges the two producers of messages for the open conversation:
//! - REST snapshots, user-initiated or from the background poll
//! - Push deliveries from the live channel
//!
//! The list is kept sorted by `created_at` ascending (stable for equal
//! timestamps) and holds at most one entry per message id, preferring the
//! server-confirmed copy over a provisional one.

use crate::storage::Message;
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Shared, observable id of the open conversation
///
/// Every clone sees the same value. Callbacks read it at call time, so a
/// late response can always tell whether its conversation is still open.
#[derive(Debug, Clone)]
pub struct ActiveChat {
    cell: Arc<watch::Sender<Option<String>>>,
}

impl ActiveChat {
    /// Create an empty cell
    pub fn new() -> Self {
        let (cell, _) = watch::channel(None);
        Self { cell: Arc::new(cell) }
    }

    /// Replace the open conversation, returning the previous one
    pub fn set(&self, chat_id: Option<String>) -> Option<String> {
        self.cell.send_replace(chat_id)
    }

    /// Current conversation id
    pub fn get(&self) -> Option<String> {
        self.cell.borrow().clone()
    }

    /// Whether `chat_id` is the open conversation
    pub fn is(&self, chat_id: &str) -> bool {
        self.cell.borrow().as_deref() == Some(chat_id)
    }

    /// Observe changes
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.cell.subscribe()
    }
}

impl Default for ActiveChat {
    fn default() -> Self {
        Self::new()
    }
}

/// Who asked for a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// Opening a conversation; failures are shown
    User,
    /// Periodic re-fetch; failures are swallowed
    Background,
}

/// Result of applying a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The list now reflects the snapshot
    Applied,
    /// The snapshot belongs to a conversation that is no longer open
    Stale,
    /// The fetch failed
    Failed,
}

/// Result of merging a single message
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// New id, inserted in order
    Inserted,
    /// Replaced a provisional copy with the confirmed one
    Replaced,
    /// Already present; nothing changed
    Duplicate,
    /// Belongs to another conversation; handed back to the caller
    Elsewhere(Message),
}

/// Ordered, deduplicated message list of the open conversation
#[derive(Debug, Clone)]
pub struct Timeline {
    active: ActiveChat,
    messages: Vec<Message>,
    error: Option<String>,
    /// Ids merged outside a user snapshot since the last one was applied
    live: HashSet<String>,
}

impl Timeline {
    /// Create an empty timeline bound to the shared active conversation
    pub fn new(active: ActiveChat) -> Self {
        Self {
            active,
            messages: Vec::new(),
            error: None,
            live: HashSet::new(),
        }
    }

    /// Messages in display order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Error of the last user-initiated load, if it failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop everything, on conversation switch
    pub fn reset(&mut self) {
        self.messages.clear();
        self.error = None;
        self.live.clear();
    }

    /// Apply the result of a REST fetch for `chat_id`
    ///
    /// A user snapshot replaces the list, except for provisional entries
    /// still waiting for their send to resolve and messages that arrived
    /// by push, poll or confirmation while it was in flight. A background
    /// snapshot is
    /// merged message by message. Snapshots for a conversation that is no
    /// longer open are ignored.
    pub fn apply_snapshot(
        &mut self,
        chat_id: &str,
        result: Result<Vec<Message>>,
        origin: FetchOrigin,
    ) -> SnapshotOutcome {
        if !self.active.is(chat_id) {
            debug!("Dropping stale snapshot for conversation {}", chat_id);
            return SnapshotOutcome::Stale;
        }

        match (result, origin) {
            (Ok(fetched), FetchOrigin::User) => {
                let live = std::mem::take(&mut self.live);
                let kept: Vec<Message> = self
                    .messages
                    .drain(..)
                    .filter(|m| m.is_pending() || live.contains(&m.id))
                    .collect();
                for message in fetched.into_iter().chain(kept) {
                    self.merge(message);
                }
                self.error = None;
                SnapshotOutcome::Applied
            }
            (Ok(fetched), FetchOrigin::Background) => {
                for message in fetched {
                    if let Incoming::Elsewhere(message) = self.apply_incoming(message) {
                        debug!(
                            "Snapshot for {} carried message {} of {}",
                            chat_id,
                            message.id,
                            message.chat_id()
                        );
                    }
                }
                self.error = None;
                SnapshotOutcome::Applied
            }
            (Err(e), FetchOrigin::User) => {
                self.messages.clear();
                self.live.clear();
                self.error = Some(e.to_string());
                SnapshotOutcome::Failed
            }
            (Err(e), FetchOrigin::Background) => {
                debug!("Background refresh of {} failed: {}", chat_id, e);
                SnapshotOutcome::Failed
            }
        }
    }

    /// Merge a single pushed or polled message
    pub fn apply_incoming(&mut self, message: Message) -> Incoming {
        if !self.active.is(message.chat_id()) {
            return Incoming::Elsewhere(message);
        }
        let id = message.id.clone();
        let outcome = self.merge(message);
        self.track(id, &outcome);
        outcome
    }

    /// Append a provisional entry for a send that has just started
    ///
    /// Returns false when the message's conversation is not open.
    pub fn insert_provisional(&mut self, message: Message) -> bool {
        if !self.active.is(message.chat_id()) {
            return false;
        }
        self.insert_sorted(message);
        true
    }

    /// Swap a provisional entry for its server-confirmed copy
    ///
    /// The confirmed copy takes the provisional entry's slot and only moves
    /// when its server timestamp breaks the ordering. If the confirmed id
    /// already arrived through push or poll, the provisional entry is
    /// dropped instead.
    pub fn resolve_provisional(&mut self, temp_id: &str, confirmed: Message) -> Incoming {
        if !self.active.is(confirmed.chat_id()) {
            return Incoming::Elsewhere(confirmed);
        }

        let provisional_at = self.position(temp_id);
        if self.position(&confirmed.id).is_some() {
            if let Some(pos) = provisional_at {
                self.messages.remove(pos);
            }
            return Incoming::Duplicate;
        }

        let id = confirmed.id.clone();
        let outcome = match provisional_at {
            Some(pos) => {
                self.messages[pos] = confirmed;
                if !self.in_order_at(pos) {
                    let moved = self.messages.remove(pos);
                    self.insert_sorted(moved);
                }
                Incoming::Replaced
            }
            None => self.merge(confirmed),
        };
        self.track(id, &outcome);
        outcome
    }

    /// Remove a provisional entry after its send failed
    pub fn discard_provisional(&mut self, temp_id: &str) -> bool {
        match self.position(temp_id) {
            Some(pos) if self.messages[pos].is_pending() => {
                self.messages.remove(pos);
                true
            }
            _ => false,
        }
    }

    /// Whether the list is sorted by `created_at`
    pub fn is_ordered(&self) -> bool {
        self.messages
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at)
    }

    fn track(&mut self, id: String, outcome: &Incoming) {
        if matches!(outcome, Incoming::Inserted | Incoming::Replaced) {
            self.live.insert(id);
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn in_order_at(&self, pos: usize) -> bool {
        let at = self.messages[pos].created_at;
        let after_prev = pos == 0 || self.messages[pos - 1].created_at <= at;
        let before_next = self
            .messages
            .get(pos + 1)
            .is_none_or(|next| at <= next.created_at);
        after_prev && before_next
    }

    fn insert_sorted(&mut self, message: Message) {
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
    }

    fn merge(&mut self, message: Message) -> Incoming {
        match self.position(&message.id) {
            Some(pos) if self.messages[pos].is_pending() && !message.is_pending() => {
                self.messages.remove(pos);
                self.insert_sorted(message);
                Incoming::Replaced
            }
            Some(_) => Incoming::Duplicate,
            None => {
                self.insert_sorted(message);
                Incoming::Inserted
            }
        }
    }
}
