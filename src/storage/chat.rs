//! Conversation management

use crate::storage::message::{Message, Participant};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// A conversation as listed by `GET /conversations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// Conversation id
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    /// Group conversation (explicit name) or direct conversation
    #[serde(rename = "isGroupChat", default)]
    pub is_group: bool,
    /// Explicit name; only meaningful for group conversations
    #[serde(rename = "chatName", default)]
    pub name: String,
    /// Members of the conversation
    #[serde(rename = "users", default)]
    pub participants: Vec<Participant>,
    /// Last known message, for list previews
    #[serde(
        rename = "latestMessage",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_message"
    )]
    pub latest_message: Option<Box<Message>>,
}

/// Unpopulated or malformed previews decode as absent instead of failing the list
fn lenient_message<'de, D>(deserializer: D) -> Result<Option<Box<Message>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match serde_json::from_value::<Message>(v) {
        Ok(message) => Some(Box::new(message)),
        Err(e) => {
            tracing::debug!("Ignoring unusable latestMessage preview: {}", e);
            None
        }
    }))
}

impl Chat {
    /// Create a direct conversation between the given participants
    pub fn direct(id: impl Into<String>, participants: Vec<Participant>) -> Self {
        Self {
            id: id.into(),
            is_group: false,
            name: String::new(),
            participants,
            latest_message: None,
        }
    }

    /// Create a named group conversation
    pub fn group(id: impl Into<String>, name: impl Into<String>, participants: Vec<Participant>) -> Self {
        Self {
            id: id.into(),
            is_group: true,
            name: name.into(),
            participants,
            latest_message: None,
        }
    }

    /// Distinct participant ids
    pub fn participant_ids(&self) -> BTreeSet<&str> {
        self.participants.iter().map(|p| p.id.as_str()).collect()
    }

    /// The other side of a direct conversation
    pub fn other_participant(&self, own_id: &str) -> Option<&Participant> {
        if self.is_group {
            return None;
        }
        self.participants.iter().find(|p| p.id != own_id)
    }

    /// Name to show for this conversation from the local user's point of view
    ///
    /// Group conversations use their explicit name; direct conversations are
    /// named after the other participant.
    pub fn display_name(&self, own_id: &str) -> &str {
        if self.is_group {
            return &self.name;
        }
        match self.other_participant(own_id) {
            Some(other) if !other.display_name.is_empty() => &other.display_name,
            Some(other) => &other.id,
            None => &self.name,
        }
    }

    /// Replace the list preview
    pub fn set_latest_message(&mut self, message: Message) {
        self.latest_message = Some(Box::new(message));
    }
}
