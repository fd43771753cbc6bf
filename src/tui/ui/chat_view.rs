//! Conversation view screen rendering

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use crate::api::ChatApi;
use crate::tui::app::App;
use crate::tui::types::Screen;
use super::helpers::{format_time, typing_label};

/// Renders the screen
pub fn render_chat_view<A: ChatApi>(f: &mut Frame, app: &App<A>) {
    let size = f.size();
    let snapshot = &app.snapshot;
    let own_id = app.own_id();
    let chat = app.active_chat();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(2)
        .constraints([
            Constraint::Length(3),  // Title
            Constraint::Min(5),     // Message history
            Constraint::Length(1),  // Typing indicator
            Constraint::Length(3),  // Input box
            Constraint::Length(3),  // Status/Help
        ])
        .split(size);

    // Title
    let title_text = match chat {
        Some(chat) if app.is_peer_online(chat) => format!("{} ●", chat.display_name(own_id)),
        Some(chat) => chat.display_name(own_id).to_string(),
        None if snapshot.active_chat.is_some() => "Conversation".to_string(),
        None => "Opening…".to_string(),
    };
    let title = Paragraph::new(title_text)
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    // Message history
    if snapshot.messages.is_empty() {
        let empty_msg = Paragraph::new("No messages yet. Type a message below and press Enter to send.")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Messages"));
        f.render_widget(empty_msg, chunks[1]);
    } else {
        // Newest at the bottom; the scroll offset counts messages hidden below
        let total = snapshot.messages.len();
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let end_idx = total - app.scroll_offset.min(total);
        let start_idx = end_idx.saturating_sub(visible_height);

        let lines: Vec<Line> = snapshot.messages[start_idx..end_idx]
            .iter()
            .map(|msg| {
                let is_from_me = msg.sender.id == own_id;
                let sender_label = if is_from_me {
                    "You"
                } else if !msg.sender.display_name.is_empty() {
                    msg.sender.display_name.as_str()
                } else {
                    msg.sender.id.as_str()
                };
                let sender_color = if is_from_me { Color::Green } else { Color::Blue };

                let mut spans = vec![
                    Span::styled(
                        format!("[{}] ", format_time(msg.created_at)),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(
                        format!("{}: ", sender_label),
                        Style::default().fg(sender_color).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(msg.content.clone(), Style::default().fg(Color::White)),
                ];
                if msg.is_pending() {
                    spans.push(Span::styled(" ⌛", Style::default().fg(Color::Yellow)));
                }
                Line::from(spans)
            })
            .collect();

        let messages_widget = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Messages ({}/{})", end_idx, total)),
        );
        f.render_widget(messages_widget, chunks[1]);
    }

    // Typing indicator
    let typing_text = if snapshot.remote_typing {
        typing_label(&snapshot.remote_typists, chat)
    } else {
        String::new()
    };
    let typing = Paragraph::new(typing_text)
        .style(Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC));
    f.render_widget(typing, chunks[2]);

    // Input box
    let input_title = if snapshot.sending { "Sending…" } else { "Type your message" };
    let input_widget = Paragraph::new(snapshot.compose.as_str())
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL).title(input_title));
    f.render_widget(input_widget, chunks[3]);

    // Status/Help
    let (help_text, help_color) = match &snapshot.notice {
        Some(notice) => (notice.text.clone(), Color::Red),
        None => (Screen::ChatView.help().to_string(), Color::DarkGray),
    };
    let help = Paragraph::new(help_text)
        .style(Style::default().fg(help_color))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(help, chunks[4]);
}
