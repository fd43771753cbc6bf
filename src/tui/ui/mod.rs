//! UI rendering module - screen-specific rendering functions
//!
//! Each screen has its own file; everything is drawn from the app's last
//! session snapshot.

mod chat_list;
mod chat_view;
mod helpers;

use ratatui::Frame;
use crate::api::ChatApi;
use crate::tui::types::Screen;
use crate::tui::app::App;

// Re-export render functions
pub use chat_list::render_chat_list;
pub use chat_view::render_chat_view;

// Re-export helper functions
pub use helpers::{connection_label, format_time, truncate, typing_label};

/// Main UI rendering function - dispatches to screen-specific render functions
pub fn ui<A: ChatApi>(f: &mut Frame, app: &App<A>) {
    match app.current_screen {
        Screen::ChatList => render_chat_list(f, app),
        Screen::ChatView => render_chat_view(f, app),
    }
}
