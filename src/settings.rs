use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::session::SessionConfig;

/// Returns the path to the settings file: `~/.config/audio-session/settings.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("audio-session");
    path.push("settings.json");
    path
}

/// Persisted settings for the demo host.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    // Session
    pub session: SessionConfig,
    /// Output device name; `None` follows the system default
    pub device: Option<String>,

    // Test tone
    pub tone_hz: f32,
    pub gain: f32,

    /// How long the demo runs before stopping
    pub run_seconds: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            device: None,

            tone_hz: 440.0,
            gain: 0.2,

            run_seconds: 5,
        }
    }
}

impl AppSettings {
    /// Load settings from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::load_from(&settings_path())
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(settings) => match settings.session.validate() {
                    Ok(()) => {
                        log::info!("Loaded settings from {}", path.display());
                        settings
                    }
                    Err(e) => {
                        log::warn!("Invalid session settings ({}), using defaults", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to disk as pretty JSON.
    pub fn save(&self) {
        self.save_to(&settings_path());
    }

    pub fn save_to(&self, path: &std::path::Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create config directory: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::warn!("Failed to write settings: {}", e);
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize settings: {}", e);
            }
        }
    }
}
