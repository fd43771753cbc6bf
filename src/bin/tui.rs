//! chatsync TUI (Terminal User Interface)
//!
//! A terminal chat client on top of the chatsync session. Credentials come
//! from `CHATSYNC_USER_ID`, `CHATSYNC_USER_NAME` and `CHATSYNC_TOKEN`; settings
//! from the JSON file named by `CHATSYNC_SETTINGS` (default `chatsync.json`).

use anyhow::Context;
use chatsync::api::{ChatApi, RestClient};
use chatsync::session::ChatSession;
use chatsync::storage::{SessionIdentity, SettingsManager};
use chatsync::transport::Connection;
use chatsync::tui::{App, ui::ui};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    Terminal,
};
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

/// Environment variable naming the settings file
const SETTINGS_PATH_ENV: &str = "CHATSYNC_SETTINGS";
const DEFAULT_SETTINGS_PATH: &str = "chatsync.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_path =
        std::env::var(SETTINGS_PATH_ENV).unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    let first_run = !std::path::Path::new(&settings_path).exists();
    let manager = SettingsManager::new(&settings_path)
        .await
        .with_context(|| format!("Failed to load settings from {}", settings_path))?;
    if first_run {
        manager
            .save()
            .await
            .with_context(|| format!("Failed to write default settings to {}", manager.path()))?;
    }
    let settings = manager.get_all().await;

    // Log to a file so output does not corrupt the terminal
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.log_path)
        .with_context(|| format!("Failed to open log file {}", settings.log_path))?;
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    if first_run {
        tracing::info!("Wrote default settings to {}", settings_path);
    }

    let identity = SessionIdentity::from_env().context("Missing credentials")?;
    let api = RestClient::new(&settings.api_base_url, identity.token.clone())?;
    let connection = Connection::connect(&settings.socket_url, &identity)?;
    let session = ChatSession::start(api, connection, identity, settings);

    if let Err(e) = session.refresh_conversations().await {
        tracing::warn!("Initial conversation load failed: {}", e);
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Create app state
    let mut app = App::new(session).await;

    // Run main loop
    let res = run_app(&mut terminal, &mut app).await;

    if !app.should_quit {
        app.quit().await;
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Some(reason) = &app.exit_reason {
        println!("{}", reason);
    }
    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend, A: ChatApi>(
    terminal: &mut Terminal<B>,
    app: &mut App<A>,
) -> io::Result<()> {
    loop {
        app.sync().await;
        if app.should_quit {
            return Ok(());
        }

        terminal.draw(|f| ui(f, app))?;

        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key).await;
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
