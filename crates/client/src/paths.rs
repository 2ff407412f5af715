//! Path resolution for client data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `DISPATCHLINK_DATA_DIR` env > `~/.dispatchlink`.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::ConfigError;

pub const DATA_DIR_ENV: &str = "DISPATCHLINK_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Priority: `explicit` arg > `DISPATCHLINK_DATA_DIR` env > `~/.dispatchlink` default.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env_value = std::env::var(DATA_DIR_ENV).ok();
        Self::resolve_with(explicit, env_value.as_deref(), dirs::home_dir())
    }

    fn resolve_with(
        explicit: Option<&Path>,
        env_value: Option<&str>,
        home: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let root = if let Some(p) = explicit {
            p.to_path_buf()
        } else if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
            PathBuf::from(value)
        } else {
            home.ok_or(ConfigError::NoHomeDir)?.join(".dispatchlink")
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir().join("client.log")
    }

    /// Create the data dir and its subdirectories.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}
