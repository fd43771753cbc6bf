//! TUI (Terminal User Interface) module
//!
//! This module contains all TUI logic separated from the binary for better testability.
//! The terminal client is one consumer of `ChatSession`; it only reads snapshots and
//! forwards key presses.

pub mod types;
pub mod app;
pub mod ui;

// Re-export main types for convenience
pub use types::Screen;
pub use app::App;
