//! Local session identity

use crate::storage::message::Participant;
use crate::{Error, Result};
use std::fmt;

/// Environment variable holding the local user id
pub const ENV_USER_ID: &str = "CHATSYNC_USER_ID";
/// Environment variable holding the local display name
pub const ENV_USER_NAME: &str = "CHATSYNC_USER_NAME";
/// Environment variable holding the bearer token
pub const ENV_TOKEN: &str = "CHATSYNC_TOKEN";
/// Environment variable holding the avatar reference
pub const ENV_AVATAR: &str = "CHATSYNC_AVATAR";

/// Identity of the logged-in user, handed over by the authentication flow
#[derive(Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// User id as known by the backend
    pub user_id: String,
    /// Name used on provisional messages
    pub display_name: String,
    /// Avatar used on provisional messages
    pub avatar_ref: Option<String>,
    /// Bearer credential for REST calls
    pub token: String,
}

impl SessionIdentity {
    /// Create an identity without avatar
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
            token: token.into(),
        }
    }

    /// Set the avatar reference
    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }

    /// The identity as it appears on messages and in the `setup` event
    pub fn participant(&self) -> Participant {
        Participant {
            id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            avatar_ref: self.avatar_ref.clone(),
        }
    }

    /// Read the identity from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the identity through a key lookup
    ///
    /// User id and token are required; the display name falls back to the
    /// user id.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{} is not set", key)))
        };

        let user_id = required(ENV_USER_ID)?;
        let token = required(ENV_TOKEN)?;
        let display_name = lookup(ENV_USER_NAME)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| user_id.clone());

        let mut identity = Self::new(user_id, display_name, token);
        identity.avatar_ref = lookup(ENV_AVATAR).filter(|v| !v.is_empty());
        Ok(identity)
    }
}

impl fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("avatar_ref", &self.avatar_ref)
            .field("token", &"<redacted>")
            .finish()
    }
}
