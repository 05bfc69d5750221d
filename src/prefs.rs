//! User preferences persistence.
//!
//! Reads lookup defaults from ~/.config/hoptrace/config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// User preferences
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefs {
    /// ipinfo.io API token for higher rate limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipinfo_token: Option<String>,
    /// Alternative lookup endpoint (self-hosted ipinfo-compatible service)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_base_url: Option<String>,
}

impl Prefs {
    /// Get config file path: ~/.config/hoptrace/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hoptrace").join("config.toml"))
    }

    /// Load preferences from disk (returns default if missing/invalid)
    pub fn load() -> Self {
        Self::path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
    }

    /// Load preferences from a specific file (returns default if missing/invalid)
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => toml::from_str(&s).unwrap_or_else(|e| {
                log::warn!("Ignoring invalid preferences file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}
