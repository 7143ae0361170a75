use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::transceiver::DEFAULT_MAX_CONTINUATIONS;

pub const DEFAULT_CONFIG_FILE: &str = "revolver.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("couldn't parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Deployment policy. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ask the eUICC to refresh the UICC when enabling a profile (refreshFlag 0x01).
    pub refresh: bool,
    /// Cap on continuation commands per logical response.
    pub max_continuations: usize,
    /// Rotation interval, used when the state store doesn't have one.
    pub interval_secs: u64,
    /// Where persisted per-reader state lives.
    pub state_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh: true,
            max_continuations: DEFAULT_MAX_CONTINUATIONS,
            interval_secs: 600,
            state_file: PathBuf::from("revolver-state.json"),
        }
    }
}

impl Config {
    /// Loads a config file. A missing file is the same as an empty one.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.into(),
                    source,
                })
            }
        };
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.into(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
