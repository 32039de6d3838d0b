//! `config.toml` handling.
//!
//! Every key is optional. Command-line flags override whatever is loaded
//! here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const APP_DIR: &str = "dotmatrix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the on-disk game library.
    pub library_dir: PathBuf,
    /// Registered engine name.
    pub engine: String,
    /// Resume the latest savestate when a game starts.
    pub resume_latest: bool,
    /// Frame pump rate in Hz.
    pub frame_rate: u32,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_dir: default_library_dir(),
            engine: "pattern".to_string(),
            resume_latest: true,
            frame_rate: 60,
            log: "info".to_string(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

fn default_library_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load from `explicit`, or from the default location.
    ///
    /// A missing file at the default location yields the defaults; a
    /// missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        Self::parse(&text).map_err(|e| e.at(path))
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=240).contains(&self.frame_rate) {
            return Err(ConfigError::Invalid(format!(
                "frame_rate must be between 1 and 240, got {}",
                self.frame_rate
            )));
        }
        if self.engine.trim().is_empty() {
            return Err(ConfigError::Invalid("engine must not be empty".to_string()));
        }
        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        // Plain fields of plain types; serialization cannot fail.
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl ConfigError {
    fn at(self, path: PathBuf) -> Self {
        match self {
            Self::Parse { source, .. } => Self::Parse {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {source}", path.display()),
            Self::Parse {
                path: Some(path),
                source,
            } => write!(f, "invalid config {}: {source}", path.display()),
            Self::Parse { path: None, source } => write!(f, "invalid config: {source}"),
            Self::Invalid(reason) => write!(f, "invalid config: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}
