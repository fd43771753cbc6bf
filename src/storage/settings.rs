//! Client settings and configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client settings
///
/// Persistent configuration for the chat client. Settings are stored in JSON
/// format and can be loaded/saved from disk; missing fields take their
/// defaults so older files keep loading.
///
/// # Example
/// ```rust,no_run
/// use chatsync::storage::Settings;
///
/// // Load settings (returns default if file doesn't exist)
/// let mut settings = Settings::load("chatsync.json").expect("Failed to load");
///
/// settings.poll_interval_ms = 10_000;
/// settings.save("chatsync.json").expect("Failed to save");
///
/// println!("Polling every {:?}", settings.poll_interval());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the REST API (e.g. `http://localhost:5000/api`)
    pub api_base_url: String,
    /// Base URL of the push channel server (e.g. `ws://localhost:5000`)
    pub socket_url: String,
    /// Background re-fetch interval in milliseconds
    pub poll_interval_ms: u64,
    /// Local typing window in milliseconds
    pub typing_window_ms: u64,
    /// Hard timeout after which a remote typing indicator clears itself
    pub remote_typing_timeout_ms: u64,
    /// Path of the log file written by the terminal client
    pub log_path: String,
}

impl Settings {
    /// Load settings from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to the settings file
    ///
    /// # Returns
    /// The loaded settings, or default settings if file doesn't exist
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read settings: {}", e)))?;

        // Handle empty file (return defaults)
        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Self = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("Failed to parse settings: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to save the settings file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create settings directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path, json)
            .map_err(|e| Error::Config(format!("Failed to write settings: {}", e)))?;

        Ok(())
    }

    /// Reject values the timers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.typing_window_ms == 0 {
            return Err(Error::Config("typing_window_ms must be positive".to_string()));
        }
        if self.remote_typing_timeout_ms == 0 {
            return Err(Error::Config(
                "remote_typing_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Background re-fetch interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Local typing window
    pub fn typing_window(&self) -> Duration {
        Duration::from_millis(self.typing_window_ms)
    }

    /// Remote typing hard timeout
    pub fn remote_typing_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_typing_timeout_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            socket_url: "ws://localhost:5000".to_string(),
            poll_interval_ms: 5_000,
            typing_window_ms: 3_000,
            remote_typing_timeout_ms: 5_000,
            log_path: "./chatsync.log".to_string(),
        }
    }
}
