//! Daemon configuration (`~/.codemapper/config.toml`)

use anyhow::{Context, Result};
use codemapper_protocol::defaults::{
    DEFAULT_SOCKET_PATH, DEFAULT_SUMMARIZER_MODEL, DEFAULT_SUMMARIZER_URL,
};
use codemapper_protocol::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Control socket location
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "paths::default_pid_file")]
    pub pid_file: PathBuf,

    /// SQLite registry of codebases, jobs and logs
    #[serde(default = "paths::default_database_path")]
    pub database_path: PathBuf,

    /// File extensions considered during discovery (with leading dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// How often the scheduler clock checks for due triggers
    #[serde(default = "default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,

    #[serde(default)]
    pub summarizer: SummarizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

pub fn default_extensions() -> Vec<String> {
    [".py", ".js", ".ts", ".tsx", ".rs", ".go"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_scheduler_tick_ms() -> u64 {
    1000
}

fn default_base_url() -> String {
    DEFAULT_SUMMARIZER_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_SUMMARIZER_MODEL.to_string()
}

fn default_context_window() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            context_window: default_context_window(),
            temperature: default_temperature(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            pid_file: paths::default_pid_file(),
            database_path: paths::default_database_path(),
            extensions: default_extensions(),
            scheduler_tick_ms: default_scheduler_tick_ms(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// `path` if given, else the home config file when it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = paths::default_config_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}
