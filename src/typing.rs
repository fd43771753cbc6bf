//! Typing indicators
//!
//! Local side: the first keystroke in `Idle` emits `typing` and moves to
//! `Signaling`. Every keystroke schedules its own deadline one window later;
//! the first deadline to pass while `Signaling` emits `stop typing`. Later
//! keystrokes do not push earlier deadlines back.
//!
//! Remote side: a `typing` signal marks the typist until `stop typing` or a
//! hard timeout, whichever comes first.

use crate::protocol::TypingNotice;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Signal the local client should emit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingSignal {
    /// Emit `typing` for the conversation
    Start(String),
    /// Emit `stop typing` for the conversation
    Stop(String),
}

/// Local signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTyping {
    /// Nothing announced
    Idle,
    /// `typing` announced, waiting for a deadline
    Signaling,
}

/// Key used when the server does not name the typist
const ANONYMOUS: &str = "";

/// Local and remote typing state
#[derive(Debug, Clone)]
pub struct TypingTracker {
    window: Duration,
    remote_timeout: Duration,
    local: LocalTyping,
    signaling_chat: Option<String>,
    deadlines: VecDeque<Instant>,
    remote: HashMap<String, HashMap<String, Instant>>,
}

impl TypingTracker {
    /// Create a tracker with the local window and remote hard timeout
    pub fn new(window: Duration, remote_timeout: Duration) -> Self {
        Self {
            window,
            remote_timeout,
            local: LocalTyping::Idle,
            signaling_chat: None,
            deadlines: VecDeque::new(),
            remote: HashMap::new(),
        }
    }

    /// Local typing window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Current local state
    pub fn local(&self) -> LocalTyping {
        self.local
    }

    /// Register a keystroke in `chat_id`
    ///
    /// Returns the signal to emit, if any, and the deadline at which the
    /// caller must invoke `timer_fired`.
    pub fn keystroke(&mut self, chat_id: &str, now: Instant) -> (Option<TypingSignal>, Instant) {
        let deadline = now + self.window;
        self.deadlines.push_back(deadline);

        if self.local == LocalTyping::Signaling {
            return (None, deadline);
        }
        self.local = LocalTyping::Signaling;
        self.signaling_chat = Some(chat_id.to_string());
        (Some(TypingSignal::Start(chat_id.to_string())), deadline)
    }

    /// A keystroke timer fired
    ///
    /// Consumes every deadline that has passed. Returns `Stop` if at least
    /// one had and the state was `Signaling`.
    pub fn timer_fired(&mut self, now: Instant) -> Option<TypingSignal> {
        let mut elapsed = false;
        while self.deadlines.front().is_some_and(|deadline| *deadline <= now) {
            self.deadlines.pop_front();
            elapsed = true;
        }
        if !elapsed {
            return None;
        }
        self.finish()
    }

    /// Stop signaling now and forget pending deadlines
    ///
    /// Used on submit, conversation switch and teardown.
    pub fn stop(&mut self) -> Option<TypingSignal> {
        self.deadlines.clear();
        self.finish()
    }

    fn finish(&mut self) -> Option<TypingSignal> {
        if self.local != LocalTyping::Signaling {
            return None;
        }
        self.local = LocalTyping::Idle;
        self.signaling_chat.take().map(TypingSignal::Stop)
    }

    /// Apply a remote `typing` (`typing == true`) or `stop typing` signal
    ///
    /// Returns the expiry to schedule for a `typing` signal.
    pub fn remote_signal(&mut self, notice: &TypingNotice, typing: bool, now: Instant) -> Option<Instant> {
        let typist = notice.participant_id.as_deref().unwrap_or(ANONYMOUS);

        if typing {
            let expiry = now + self.remote_timeout;
            self.remote
                .entry(notice.chat_id.clone())
                .or_default()
                .insert(typist.to_string(), expiry);
            return Some(expiry);
        }

        if let Some(typists) = self.remote.get_mut(&notice.chat_id) {
            if notice.participant_id.is_some() {
                typists.remove(typist);
            } else {
                typists.clear();
            }
            if typists.is_empty() {
                self.remote.remove(&notice.chat_id);
            }
        }
        None
    }

    /// Drop remote typists whose hard timeout passed; true if any were dropped
    pub fn expire_remote(&mut self, now: Instant) -> bool {
        let mut changed = false;
        self.remote.retain(|_, typists| {
            let before = typists.len();
            typists.retain(|_, expiry| *expiry > now);
            changed |= typists.len() != before;
            !typists.is_empty()
        });
        changed
    }

    /// Whether someone else is typing in `chat_id`
    pub fn is_remote_typing(&self, chat_id: &str, now: Instant) -> bool {
        self.remote
            .get(chat_id)
            .is_some_and(|typists| typists.values().any(|expiry| *expiry > now))
    }

    /// Named typists of `chat_id`, sorted
    pub fn remote_typists(&self, chat_id: &str, now: Instant) -> Vec<String> {
        let mut typists: Vec<String> = self
            .remote
            .get(chat_id)
            .map(|typists| {
                typists
                    .iter()
                    .filter(|(id, expiry)| !id.is_empty() && **expiry > now)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        typists.sort();
        typists
    }

    /// Forget every remote typist
    pub fn clear_remote(&mut self) {
        self.remote.clear();
    }
}
