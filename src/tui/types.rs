//! Core types for TUI screens and navigation

/// Application screens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// Conversation list with unread badges and presence
    ChatList,
    /// Open conversation with compose line
    ChatView,
}

impl Screen {
    /// Help line shown at the bottom of the screen
    pub fn help(&self) -> &'static str {
        match self {
            Self::ChatList => "↑↓/j/k: Navigate | Enter: Open | r: Refresh | x: Dismiss notice | q: Quit",
            Self::ChatView => "Enter: Send | PgUp/PgDn: Scroll | Esc: Back to conversations",
        }
    }
}
