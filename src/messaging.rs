//! Messaging module
//!
//! This module tracks outgoing messages including:
//! - The compose buffer of the open conversation
//! - One optimistic submission per conversation, from provisional to resolved
//!
//! Text lives in the `Composer` until it is taken; from then on a submission
//! moves `Sending -> Confirmed | Failed`. While a conversation has a
//! submission in `Sending`, another one cannot begin.

use crate::storage::{Message, Participant};
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Lifecycle of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    /// Provisional entry shown, durable write in flight
    Sending,
    /// Server confirmed the message
    Confirmed,
    /// Durable write failed; provisional entry removed
    Failed,
}

/// A message on its way to the server
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Id of the provisional entry
    pub temp_id: String,
    /// Target conversation
    pub chat_id: String,
    /// Trimmed message text
    pub content: String,
    /// Current state
    pub state: SubmissionState,
}

/// Compose buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    text: String,
}

impl Composer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffer contents
    pub fn set(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Current contents
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Take the trimmed contents and clear the buffer
    ///
    /// Returns `None` and leaves the buffer alone when it is blank.
    pub fn take(&mut self) -> Option<String> {
        let content = self.text.trim();
        if content.is_empty() {
            return None;
        }
        let content = content.to_string();
        self.text.clear();
        Some(content)
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.text.clear();
    }
}

/// In-flight submissions, at most one per conversation
#[derive(Debug, Default)]
pub struct SendPipeline {
    in_flight: HashMap<String, Submission>,
}

impl SendPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a submission and build its provisional message
    ///
    /// # Errors
    /// `EmptyMessage` for blank content, `SendInFlight` while the
    /// conversation still has an unresolved submission.
    pub fn begin(&mut self, chat_id: &str, sender: Participant, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::EmptyMessage);
        }
        if self.in_flight.contains_key(chat_id) {
            return Err(Error::SendInFlight(chat_id.to_string()));
        }

        let provisional = Message::provisional(chat_id, sender, content);
        debug!("Sending {} in conversation {}", provisional.id, chat_id);

        self.in_flight.insert(
            chat_id.to_string(),
            Submission {
                temp_id: provisional.id.clone(),
                chat_id: chat_id.to_string(),
                content: content.to_string(),
                state: SubmissionState::Sending,
            },
        );
        Ok(provisional)
    }

    /// Resolve the conversation's submission as confirmed
    pub fn confirm(&mut self, chat_id: &str, confirmed_id: &str) -> Option<Submission> {
        let mut submission = self.in_flight.remove(chat_id)?;
        submission.state = SubmissionState::Confirmed;
        info!("Message {} confirmed as {}", submission.temp_id, confirmed_id);
        Some(submission)
    }

    /// Resolve the conversation's submission as failed
    pub fn fail(&mut self, chat_id: &str, reason: &Error) -> Option<Submission> {
        let mut submission = self.in_flight.remove(chat_id)?;
        submission.state = SubmissionState::Failed;
        warn!("Message {} failed: {}", submission.temp_id, reason);
        Some(submission)
    }

    /// The unresolved submission of a conversation
    pub fn in_flight(&self, chat_id: &str) -> Option<&Submission> {
        self.in_flight.get(chat_id)
    }

    /// Whether any conversation has an unresolved submission
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }
}
