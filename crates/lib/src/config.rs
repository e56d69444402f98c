//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.huddle/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::api::Settings;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend REST API settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Chat defaults (new conversation title, settings panel seed values).
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Where the conversation backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the backend (default "http://127.0.0.1:8000"). Overridden by HUDDLE_API_URL env.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Chat defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Title for conversations created by "new chat" or implicitly on first send.
    #[serde(default = "default_title")]
    pub default_title: String,

    /// Settings shown before any conversation is loaded.
    #[serde(default)]
    pub default_settings: DefaultSettings,
}

fn default_title() -> String {
    "New Chat".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_title: default_title(),
            default_settings: DefaultSettings::default(),
        }
    }
}

/// Seed values for the settings panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub system_prompt: String,
}

fn default_temperature() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: String::new(),
        }
    }
}

impl From<&DefaultSettings> for Settings {
    fn from(d: &DefaultSettings) -> Self {
        Settings {
            temperature: d.temperature,
            max_tokens: d.max_tokens,
            system_prompt: d.system_prompt.clone(),
        }
    }
}

/// Resolve the backend base URL: env HUDDLE_API_URL overrides config. Trailing slashes are dropped.
pub fn resolve_base_url(config: &Config) -> String {
    std::env::var("HUDDLE_API_URL")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .unwrap_or_else(|| config.backend.base_url.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HUDDLE_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".huddle").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or HUDDLE_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
