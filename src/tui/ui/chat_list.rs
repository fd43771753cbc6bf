//! Conversation list screen rendering

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};
use crate::api::ChatApi;
use crate::tui::app::App;
use crate::tui::types::Screen;
use super::helpers::{connection_label, truncate};

/// Renders the screen
pub fn render_chat_list<A: ChatApi>(f: &mut Frame, app: &App<A>) {
    let size = f.size();
    let snapshot = &app.snapshot;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(2)
        .constraints([
            Constraint::Length(3),  // Title
            Constraint::Min(5),     // Conversation list
            Constraint::Length(3),  // Status message
            Constraint::Length(3),  // Help text
        ])
        .split(size);

    // Title
    let title = Paragraph::new(format!(
        "Conversations ({}) · {}",
        snapshot.conversations.len(),
        connection_label(snapshot.connection)
    ))
    .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    if snapshot.conversations.is_empty() {
        let empty_msg = Paragraph::new("No conversations yet. Press r to refresh.")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Conversations"));
        f.render_widget(empty_msg, chunks[1]);
    } else {
        let own_id = app.own_id();
        let items: Vec<ListItem> = snapshot
            .conversations
            .iter()
            .enumerate()
            .map(|(i, chat)| {
                let unread = app.unread_count(&chat.id);

                // Group marker, then presence of the other side for direct chats
                let (indicator, indicator_style) = if chat.is_group {
                    ("# ", Style::default().fg(Color::Magenta))
                } else if app.is_peer_online(chat) {
                    ("● ", Style::default().fg(Color::Green))
                } else {
                    ("○ ", Style::default().fg(Color::DarkGray))
                };

                let name_style = if unread > 0 {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };

                let mut spans = vec![
                    if i == app.selected_index {
                        Span::styled("→ ", Style::default().fg(Color::Cyan))
                    } else {
                        Span::raw("  ")
                    },
                    Span::styled(indicator, indicator_style),
                    Span::styled(chat.display_name(own_id).to_string(), name_style),
                ];
                if unread > 0 {
                    spans.push(Span::styled(
                        format!(" ({})", unread),
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    ));
                }
                if let Some(latest) = &chat.latest_message {
                    spans.push(Span::styled(
                        format!("  {}", truncate(&latest.content, 40)),
                        Style::default().fg(Color::DarkGray),
                    ));
                }

                ListItem::new(Line::from(spans))
            })
            .collect();

        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Conversations (● Online | ○ Offline | # Group | (n) Unread)"),
        );
        f.render_widget(list, chunks[1]);
    }

    // Status message: notice first, otherwise presence
    let (status_text, status_color) = match &snapshot.notice {
        Some(notice) => (notice.text.clone(), Color::Red),
        None => (format!("{} online", snapshot.online.len()), Color::Green),
    };
    let status_widget = Paragraph::new(status_text)
        .style(Style::default().fg(status_color))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status_widget, chunks[2]);

    // Help text
    let help = Paragraph::new(Screen::ChatList.help())
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(help, chunks[3]);
}
