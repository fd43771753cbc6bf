//! Thread-safe settings manager for concurrent access

use crate::{storage::settings::Settings, Result};

/// Thread-safe settings manager for UI layer access
///
/// Provides shared access to client settings and writes them back to the
/// file they were loaded from.
///
/// # Example
/// ```rust,no_run
/// use chatsync::storage::SettingsManager;
///
/// # async fn example() -> chatsync::Result<()> {
/// let manager = SettingsManager::new("chatsync.json").await?;
///
/// let settings = manager.get_all().await;
/// println!("Polling every {:?}", settings.poll_interval());
///
/// // Write the current settings (defaults on first run)
/// manager.save().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SettingsManager {
    /// Shared settings state
    settings: std::sync::Arc<tokio::sync::RwLock<Settings>>,
    /// Path to settings file
    settings_path: std::sync::Arc<String>,
}

impl SettingsManager {
    /// Create a new settings manager
    ///
    /// Loads settings from the specified path, or uses defaults if the file doesn't exist.
    pub async fn new<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let settings = Settings::load(&path)?;

        Ok(Self {
            settings: std::sync::Arc::new(tokio::sync::RwLock::new(settings)),
            settings_path: std::sync::Arc::new(path_str),
        })
    }

    /// Path of the backing settings file
    pub fn path(&self) -> &str {
        self.settings_path.as_str()
    }

    /// Get a clone of all settings (for reading multiple values at once)
    pub async fn get_all(&self) -> Settings {
        let settings = self.settings.read().await;
        settings.clone()
    }

    /// Save current settings to disk
    pub async fn save(&self) -> Result<()> {
        let settings = self.settings.read().await;
        settings.save(self.settings_path.as_str())
    }
}
