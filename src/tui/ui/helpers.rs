//! UI helper functions

use chrono::{DateTime, Local, Utc};
use crate::storage::Chat;
use crate::transport::ConnectionStatus;

/// Format a message timestamp in local time
pub fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

/// Short description of the push channel state
pub fn connection_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Connected => "live",
        ConnectionStatus::Connecting => "connecting…",
        ConnectionStatus::Disconnected => "offline, polling only",
    }
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

/// "X is typing…" line, resolving ids against the conversation's participants
pub fn typing_label(typists: &[String], chat: Option<&Chat>) -> String {
    let names: Vec<&str> = typists
        .iter()
        .map(|id| {
            chat.and_then(|c| c.participants.iter().find(|p| p.id == *id))
                .map(|p| p.display_name.as_str())
                .filter(|name| !name.is_empty())
                .unwrap_or(id.as_str())
        })
        .collect();

    match names.as_slice() {
        [] => "Someone is typing…".to_string(),
        [one] => format!("{} is typing…", one),
        many => format!("{} are typing…", many.join(", ")),
    }
}
