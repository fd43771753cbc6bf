//! Main TUI application state and logic

use crate::api::ChatApi;
use crate::session::{ChatSession, NoticeKind, SessionSnapshot};
use crate::storage::Chat;
use crate::tui::types::Screen;
use crate::Error;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Messages scrolled per PgUp/PgDn
const SCROLL_STEP: usize = 5;

/// Application state
pub struct App<A: ChatApi> {
    /// Session driving everything shown
    pub session: ChatSession<A>,
    /// Current screen
    pub current_screen: Screen,
    /// Selected row in the conversation list
    pub selected_index: usize,
    /// Messages scrolled up from the bottom of the conversation
    pub scroll_offset: usize,
    /// Last copy of the session state
    pub snapshot: SessionSnapshot,
    /// Should quit
    pub should_quit: bool,
    /// Printed after the terminal is restored
    pub exit_reason: Option<String>,
    refresh_task: Option<JoinHandle<()>>,
}

impl<A: ChatApi> App<A> {
    /// Create the application on the conversation list
    pub async fn new(session: ChatSession<A>) -> Self {
        let snapshot = session.snapshot().await;
        Self {
            session,
            current_screen: Screen::ChatList,
            selected_index: 0,
            scroll_offset: 0,
            snapshot,
            should_quit: false,
            exit_reason: None,
            refresh_task: None,
        }
    }

    /// Pull the latest session state; called once per frame
    pub async fn sync(&mut self) {
        self.snapshot = self.session.snapshot().await;

        let count = self.snapshot.conversations.len();
        if self.selected_index >= count {
            self.selected_index = count.saturating_sub(1);
        }

        let expired = self
            .snapshot
            .notice
            .as_ref()
            .filter(|n| n.kind == NoticeKind::SessionExpired)
            .map(|n| n.text.clone());
        if let Some(reason) = expired {
            if !self.should_quit {
                warn!("Leaving: {}", reason);
                self.exit_reason = Some(reason);
                self.quit().await;
            }
            return;
        }

        if self.snapshot.needs_refresh {
            self.request_refresh();
        }
    }

    /// Re-fetch the conversation list in the background
    pub fn request_refresh(&mut self) {
        if self.refresh_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let session = self.session.clone();
        self.refresh_task = Some(tokio::spawn(async move {
            if let Err(e) = session.refresh_conversations().await {
                debug!("Conversation refresh failed: {}", e);
            }
        }));
    }

    /// Id of the local user
    pub fn own_id(&self) -> &str {
        &self.session.identity().user_id
    }

    /// Conversation under the cursor
    pub fn selected_chat(&self) -> Option<&Chat> {
        self.snapshot.conversations.get(self.selected_index)
    }

    /// Conversation currently open
    pub fn active_chat(&self) -> Option<&Chat> {
        let chat_id = self.snapshot.active_chat.as_deref()?;
        self.snapshot.conversations.iter().find(|c| c.id == chat_id)
    }

    /// Unread notifications for a conversation
    pub fn unread_count(&self, chat_id: &str) -> usize {
        self.snapshot
            .notifications
            .iter()
            .filter(|n| n.chat_id == chat_id)
            .count()
    }

    /// Whether the other side of a direct conversation is online
    pub fn is_peer_online(&self, chat: &Chat) -> bool {
        chat.other_participant(self.own_id())
            .is_some_and(|peer| self.snapshot.online.iter().any(|id| *id == peer.id))
    }

    /// Move to next conversation
    pub fn next(&mut self) {
        let count = self.snapshot.conversations.len();
        if count > 0 {
            self.selected_index = (self.selected_index + 1) % count;
        }
    }

    /// Move to previous conversation
    pub fn previous(&mut self) {
        let count = self.snapshot.conversations.len();
        if count == 0 {
            return;
        }
        if self.selected_index > 0 {
            self.selected_index -= 1;
        } else {
            self.selected_index = count - 1;
        }
    }

    /// Open selected conversation
    ///
    /// The history loads in the background; the view shows whatever the
    /// session has so far.
    pub fn open_selected_chat(&mut self) {
        let Some(chat) = self.selected_chat() else {
            return;
        };
        let chat_id = chat.id.clone();

        let session = self.session.clone();
        tokio::spawn(async move {
            session.open(&chat_id).await;
        });

        self.current_screen = Screen::ChatView;
        self.scroll_offset = 0;
    }

    /// Return to conversation list
    pub async fn back_to_chat_list(&mut self) {
        self.session.close_conversation().await;
        self.current_screen = Screen::ChatList;
        self.scroll_offset = 0;
        self.snapshot.compose.clear();
        self.request_refresh();
    }

    /// Append a character to the compose line
    pub async fn type_char(&mut self, c: char) {
        let mut text = self.snapshot.compose.clone();
        text.push(c);
        self.session.input(text.clone()).await;
        self.snapshot.compose = text;
    }

    /// Remove the last character of the compose line
    pub async fn backspace(&mut self) {
        let mut text = self.snapshot.compose.clone();
        if text.pop().is_none() {
            return;
        }
        self.session.input(text.clone()).await;
        self.snapshot.compose = text;
    }

    /// Send the compose line
    pub async fn send_message(&mut self) {
        match self.session.submit_in_background().await {
            Ok(_) => {
                self.snapshot.compose.clear();
                self.scroll_offset = 0;
            }
            Err(Error::EmptyMessage) | Err(Error::NoActiveConversation) => {}
            Err(e) => debug!("Send not started: {}", e),
        }
    }

    /// Scroll towards older messages
    pub fn scroll_up(&mut self) {
        let len = self.snapshot.messages.len();
        self.scroll_offset = (self.scroll_offset + SCROLL_STEP).min(len.saturating_sub(1));
    }

    /// Scroll towards newer messages
    pub fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(SCROLL_STEP);
    }

    /// End the session and leave the main loop
    pub async fn quit(&mut self) {
        self.session.shutdown().await;
        self.should_quit = true;
    }

    /// Dispatch a key press for the current screen
    pub async fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit().await;
            return;
        }

        match self.current_screen {
            Screen::ChatList => match key.code {
                KeyCode::Char('q') => self.quit().await,
                KeyCode::Down | KeyCode::Char('j') => self.next(),
                KeyCode::Up | KeyCode::Char('k') => self.previous(),
                KeyCode::Enter => self.open_selected_chat(),
                KeyCode::Char('r') => self.request_refresh(),
                KeyCode::Char('x') => self.session.dismiss_notice().await,
                _ => {}
            },
            Screen::ChatView => match key.code {
                KeyCode::Esc => self.back_to_chat_list().await,
                KeyCode::Enter => self.send_message().await,
                KeyCode::Backspace => self.backspace().await,
                KeyCode::PageUp => self.scroll_up(),
                KeyCode::PageDown => self.scroll_down(),
                KeyCode::Char(c) => self.type_char(c).await,
                _ => {}
            },
        }
    }
}
