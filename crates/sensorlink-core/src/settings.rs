//! Persisted user settings
//!
//! Remembers the last port/baud pair that connected successfully so hosts can
//! pre-select it at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Errors while reading or writing settings
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document could not be (de)serialized
    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Last successful connection target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPort {
    /// Device path
    pub path: String,
    /// Baud rate
    pub baud_rate: u32,
}

/// Settings document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Last successful connection, if any
    pub last_port: Option<LastPort>,
}

/// Storage for [`Settings`]
pub trait SettingsStore: Send + Sync {
    /// Load settings, falling back to defaults when nothing is stored
    fn load(&self) -> Settings;

    /// Replace the stored settings
    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;

    /// Last successful connection target
    fn last_port(&self) -> Option<LastPort> {
        self.load().last_port
    }

    /// Record a successful connection target
    fn save_last_port(&self, port: LastPort) -> Result<(), SettingsError> {
        let mut settings = self.load();
        settings.last_port = Some(port);
        self.save(&settings)
    }
}

/// Settings stored as pretty-printed JSON in a file
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/sensorlink/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sensorlink").join("settings.json"))
    }

    /// Shared store at the default path, or an in-memory store when the
    /// platform has no config directory
    pub fn shared_default() -> Arc<dyn SettingsStore> {
        match Self::default_path() {
            Some(path) => Arc::new(Self::new(path)),
            None => {
                tracing::warn!("No config directory available, settings will not persist");
                Arc::new(MemorySettingsStore::default())
            }
        }
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Settings {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Settings::default(),
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable settings {}: {e}", self.path.display());
            Settings::default()
        })
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Settings kept in memory only
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
}

impl MemorySettingsStore {
    /// Shared empty store
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        Ok(())
    }
}
