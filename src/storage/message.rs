//! Message structures and their wire representation

use crate::storage::chat::Chat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix that marks locally generated, not yet confirmed message ids
pub const PROVISIONAL_ID_PREFIX: &str = "temp-";

/// A user as embedded in messages and conversations
///
/// The backend sends either a populated object (`{"_id", "name", "pic"}`) or
/// just the id string when the reference was not populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ParticipantRepr")]
pub struct Participant {
    /// Participant identifier
    #[serde(rename = "_id")]
    pub id: String,
    /// Name shown in the UI
    #[serde(rename = "name")]
    pub display_name: String,
    /// Avatar URL or reference
    #[serde(rename = "pic", skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParticipantRepr {
    Id(String),
    Populated {
        #[serde(rename = "_id", alias = "id")]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        pic: Option<String>,
    },
}

impl From<ParticipantRepr> for Participant {
    fn from(repr: ParticipantRepr) -> Self {
        match repr {
            ParticipantRepr::Id(id) => Self {
                id,
                ..Self::default()
            },
            ParticipantRepr::Populated { id, name, pic } => Self {
                id,
                display_name: name,
                avatar_ref: pic,
            },
        }
    }
}

impl Participant {
    /// Create a participant with a display name and no avatar
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }
}

/// Reference from a message to its conversation
///
/// Pushed and listed messages carry the populated conversation; a populated
/// reference is kept so the `new message` broadcast still names the
/// participants the server fans the message out to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatRef {
    /// Bare conversation id
    Id(String),
    /// Populated conversation document
    Populated(Box<Chat>),
}

impl ChatRef {
    /// Conversation id regardless of population
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Populated(chat) => &chat.id,
        }
    }
}

/// A chat message, provisional or server-confirmed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server id, or a `temp-` id while provisional
    #[serde(rename = "_id")]
    pub id: String,
    /// Message text
    pub content: String,
    /// Author
    pub sender: Participant,
    /// Owning conversation
    pub chat: ChatRef,
    /// Server clock for confirmed messages, local clock for provisional ones
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// True until reconciled with the server copy or discarded
    #[serde(skip)]
    pub is_provisional: bool,
}

impl Message {
    /// Create a confirmed message
    pub fn new(
        id: impl Into<String>,
        chat_id: impl Into<String>,
        sender: Participant,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            sender,
            chat: ChatRef::Id(chat_id.into()),
            created_at,
            is_provisional: false,
        }
    }

    /// Create a provisional message stamped with the local clock
    pub fn provisional(
        chat_id: impl Into<String>,
        sender: Participant,
        content: impl Into<String>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: provisional_id(created_at),
            content: content.into(),
            sender,
            chat: ChatRef::Id(chat_id.into()),
            created_at,
            is_provisional: true,
        }
    }

    /// Id of the owning conversation
    pub fn chat_id(&self) -> &str {
        self.chat.id()
    }

    /// Whether this message still waits for server confirmation
    ///
    /// Checks the id prefix as well, so a provisional message that was
    /// serialized and decoded again is still recognized.
    pub fn is_pending(&self) -> bool {
        self.is_provisional || is_provisional_id(&self.id)
    }
}

/// Generate a provisional id: `temp-<unix millis>-<8 hex chars>`
pub fn provisional_id(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}-{}",
        PROVISIONAL_ID_PREFIX,
        at.timestamp_millis(),
        &suffix[..8]
    )
}

/// Whether an id was generated locally
pub fn is_provisional_id(id: &str) -> bool {
    id.starts_with(PROVISIONAL_ID_PREFIX)
}
