//! Server configuration loaded from TOML.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Listener and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

/// Session policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Followers required, together with a leader, before the session starts.
    #[serde(default = "default_expected_followers")]
    pub expected_followers: usize,
    /// Restart the whole session whenever it is compromised.
    #[serde(default = "default_true")]
    pub strict: bool,
    /// Action names the relay drops instead of forwarding.
    #[serde(default)]
    pub blocked_actions: BTreeSet<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expected_followers: default_expected_followers(),
            strict: true,
            blocked_actions: BTreeSet::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7420
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_expected_followers() -> usize {
    1
}

fn default_true() -> bool {
    true
}
