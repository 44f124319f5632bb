//! Configuration file support for folio-chat
//!
//! Loads config from ~/.folio-chat/config.toml

use serde::Deserialize;
use std::path::PathBuf;

/// Configuration for folio-chat
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Gemini API key for the chat proxy
    pub gemini_api_key: Option<String>,

    /// Origins allowed to receive CORS grants
    pub allowed_origins: Option<Vec<String>>,

    /// Model chain tried in order
    pub models: Option<Vec<String>>,

    /// Server port
    pub port: Option<u16>,
}

impl Config {
    /// Load config from ~/.folio-chat/config.toml
    pub fn load() -> Self {
        Self::load_from(config_path())
    }

    fn load_from(path: PathBuf) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".folio-chat")
        .join("config.toml")
}
