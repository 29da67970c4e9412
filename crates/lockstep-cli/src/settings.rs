//! The config file as the binary sees it: server sections plus `[client]`.

use lockstep_client::ClientConfig;
use lockstep_server::Config;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(flatten)]
    pub core: Config,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Command-line overrides for `serve`.
#[derive(Debug, Clone, Default)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub expected_followers: Option<usize>,
    pub non_strict: bool,
    pub block: Vec<String>,
}

impl FileConfig {
    pub fn apply_serve(&mut self, overrides: ServeOverrides) {
        if let Some(host) = overrides.host {
            self.core.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.core.server.port = port;
        }
        if let Some(n) = overrides.expected_followers {
            self.core.session.expected_followers = n;
        }
        if overrides.non_strict {
            self.core.session.strict = false;
        }
        self.core.session.blocked_actions.extend(overrides.block);
    }

    pub fn apply_url(&mut self, url: Option<String>) {
        if let Some(url) = url {
            self.client.url = url;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_file_parses() {
        let config: FileConfig = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [session]
            expected_followers = 3
            strict = false
            blocked_actions = ["setInputFiles"]

            [client]
            url = "ws://mirror.local:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.core.server.host, "0.0.0.0");
        assert_eq!(config.core.session.expected_followers, 3);
        assert!(!config.core.session.strict);
        assert!(config.core.session.blocked_actions.contains("setInputFiles"));
        assert_eq!(config.client.url, "ws://mirror.local:9000");
        assert_eq!(config.client.poll_interval_ms, 100);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.core.server.port, 7420);
        assert!(config.core.session.strict);
        assert_eq!(config.client, ClientConfig::default());
    }

    #[test]
    fn serve_overrides_win() {
        let mut config = FileConfig::default();
        config.core.session.blocked_actions.insert("fill".to_string());
        config.apply_serve(ServeOverrides {
            port: Some(8000),
            expected_followers: Some(0),
            non_strict: true,
            block: vec!["press".to_string()],
            ..ServeOverrides::default()
        });
        assert_eq!(config.core.server.port, 8000);
        assert_eq!(config.core.server.host, "127.0.0.1");
        assert_eq!(config.core.session.expected_followers, 0);
        assert!(!config.core.session.strict);
        assert_eq!(config.core.session.blocked_actions.len(), 2);
    }

    #[test]
    fn effective_config_round_trips_through_toml() {
        let config = FileConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[session]"));
        assert!(text.contains("[client]"));
        let back: FileConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.core.session, config.core.session);
    }
}
