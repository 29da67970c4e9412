//! Config file discovery and loading.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::ServerError;

/// Load configuration from the given path, or the default location.
///
/// A missing file is not an error: the type's defaults are used instead.
/// Callers may pass any `Deserialize` type so that binaries can extend the
/// file with their own sections.
pub fn load_config<T>(path: Option<&str>) -> Result<T, ServerError>
where
    T: DeserializeOwned + Default,
{
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path(),
    };
    load_config_from(&config_path, path.is_some())
}

fn load_config_from<T>(config_path: &Path, explicit: bool) -> Result<T, ServerError>
where
    T: DeserializeOwned + Default,
{
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| ServerError::Config(format!("failed to read config: {e}")))?;
        let config: T = toml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else if explicit {
        Err(ServerError::Config(format!(
            "config file not found: {}",
            config_path.display()
        )))
    } else {
        info!("no config file found, using defaults");
        Ok(T::default())
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("lockstep")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
