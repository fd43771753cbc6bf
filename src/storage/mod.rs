//! Storage module
//!
//! In-memory models shared by every component, plus the persisted client
//! settings:
//! - `message` - Messages and their senders, provisional id generation
//! - `chat` - Conversations as listed by the backend
//! - `identity` - The local session identity handed over by authentication
//! - `settings` - Client settings persisted as JSON
//! - `settings_manager` - Shared access to the settings and their file
//!
//! Message history is never persisted client-side: the open conversation's
//! list lives in memory and is discarded when the user navigates away.

// Submodules
pub mod chat;
pub mod identity;
pub mod message;
pub mod settings;
pub mod settings_manager;

// Re-export commonly used types
pub use chat::Chat;
pub use identity::SessionIdentity;
pub use message::{ChatRef, Message, Participant, PROVISIONAL_ID_PREFIX};
pub use settings::Settings;
pub use settings_manager::SettingsManager;
