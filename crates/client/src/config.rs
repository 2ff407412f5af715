//! Client configuration.
//!
//! Precedence: explicit overrides (CLI flags and their env fallbacks) >
//! `<data_dir>/config.toml` > built-in defaults. A missing config file is not
//! an error; a malformed one is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::{ConnectionOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_DELAY};
use crate::notification_center::DEFAULT_CAPACITY;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Home directory not found; set DISPATCHLINK_DATA_DIR or pass --data-dir")]
    NoHomeDir,

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk shape; every field optional.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub ws_url: Option<String>,
    pub api_url: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
    pub auto_reconnect: Option<bool>,
    pub notification_capacity: Option<usize>,
}

impl FileConfig {
    /// Load `path`, or the empty config when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Values supplied on the command line (or their env fallbacks)
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub ws_url: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub ws_url: String,
    pub api_url: String,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub auto_reconnect: bool,
    pub notification_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            auto_reconnect: true,
            notification_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Self {
        let defaults = Self::default();
        Self {
            ws_url: overrides.ws_url.or(file.ws_url).unwrap_or(defaults.ws_url),
            api_url: overrides
                .api_url
                .or(file.api_url)
                .unwrap_or(defaults.api_url),
            connect_timeout: file
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            reconnect_delay: file
                .reconnect_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_delay),
            auto_reconnect: file.auto_reconnect.unwrap_or(defaults.auto_reconnect),
            notification_capacity: file
                .notification_capacity
                .unwrap_or(defaults.notification_capacity),
        }
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            url: self.ws_url.clone(),
            connect_timeout: self.connect_timeout,
            reconnect_delay: self.reconnect_delay,
            auto_reconnect: self.auto_reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let file = FileConfig::load(&tmp.path().join("config.toml")).unwrap();
        let config = ClientConfig::resolve(file, Overrides::default());
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.ws_url, "ws://localhost:8080/ws");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn overrides_beat_file_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
ws_url = "ws://dispatch.internal/ws"
api_url = "http://dispatch.internal"
reconnect_delay_secs = 2
auto_reconnect = false
"#,
        )
        .unwrap();

        let file = FileConfig::load(&path).unwrap();
        let config = ClientConfig::resolve(
            file,
            Overrides {
                ws_url: Some("ws://127.0.0.1:9000/ws".into()),
                api_url: None,
            },
        );
        assert_eq!(config.ws_url, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.api_url, "http://dispatch.internal");
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert!(!config.auto_reconnect);

        let options = config.connection_options();
        assert_eq!(options.url, "ws://127.0.0.1:9000/ws");
        assert!(!options.auto_reconnect);
    }

    #[test]
    fn malformed_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "ws_urll = 3").unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
