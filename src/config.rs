//! Configuration file support.
//!
//! Loads config from ~/.portfolio-intel/config.toml. Command-line flags
//! override file values; missing fields take the defaults below.

use crate::db::models::ClientProfile;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the Portfolio Intelligence API
    pub api_base_url: String,

    /// Base URL for the agent-status WebSocket; derived from `api_base_url` when unset
    pub ws_base_url: Option<String>,

    /// Per-request timeout. Multi-agent queries can take a long time.
    pub request_timeout_secs: u64,

    /// Longest query accepted before it is rejected locally
    pub max_query_length: usize,

    /// How many recent messages are sent as context with each query
    pub max_history_sent: usize,

    /// Subscribe to live agent activity while a query runs
    pub agent_status_feed: bool,

    /// Where the local store lives
    pub data_dir: Option<PathBuf>,

    /// Clients available for selection
    pub clients: Vec<ClientProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_base_url: None,
            request_timeout_secs: 90,
            max_query_length: 2000,
            max_history_sent: 10,
            agent_status_feed: false,
            data_dir: None,
            clients: default_clients(),
        }
    }
}

impl Config {
    /// Load config from ~/.portfolio-intel/config.toml
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ws_base_url(&self) -> &str {
        self.ws_base_url.as_deref().unwrap_or(&self.api_base_url)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("portfolio-intel")
        })
    }
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".portfolio-intel")
        .join("config.toml")
}

fn default_clients() -> Vec<ClientProfile> {
    [
        ("CLT-001", "Conservative Retiree", 6),
        ("CLT-002", "Growth Investor", 8),
        ("CLT-003", "Balanced Family Trust", 10),
        ("CLT-004", "Tech Concentrated", 5),
        ("CLT-005", "Income Focused", 7),
    ]
    .into_iter()
    .map(|(id, label, holdings)| ClientProfile {
        id: id.to_string(),
        label: label.to_string(),
        holdings,
    })
    .collect()
}
