//! Online presence
//!
//! The server pushes the whole roster every time; the set is replaced
//! wholesale, never patched.

use std::collections::HashSet;
use tracing::debug;

/// Participants currently online
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    online: HashSet<String>,
}

impl PresenceTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the online set with a new roster
    pub fn replace<I>(&mut self, roster: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.online = roster.into_iter().collect();
        debug!("{} participant(s) online", self.online.len());
    }

    /// Whether a participant is online
    pub fn is_online(&self, participant_id: &str) -> bool {
        self.online.contains(participant_id)
    }

    /// Number of participants online
    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// Online participant ids, sorted
    pub fn online(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.online.iter().cloned().collect();
        ids.sort();
        ids
    }
}
