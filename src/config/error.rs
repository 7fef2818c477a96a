//! Errors raised while loading, checking or saving the configuration file.

use crate::port::BaudRate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot encode configuration: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Defaults-only configurations have no file behind them.
    #[error("configuration was not loaded from a file, use save_to instead")]
    NoBackingFile,

    #[error("{origin}: {value} baud is not supported (expected one of {})", supported_rates())]
    UnsupportedBaud { origin: String, value: u32 },

    #[error("profile port {port} is listed in discovery.exclude_ports and would never attach")]
    ExcludedProfilePort { port: String },

    #[error("{key} {reason}")]
    Invalid { key: &'static str, reason: &'static str },

    #[error("{var}: {message}")]
    Env { var: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: &'static str) -> Self {
        Self::Invalid { key, reason }
    }

    pub fn env(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            message: message.into(),
        }
    }
}

fn supported_rates() -> String {
    BaudRate::ALL
        .iter()
        .map(|rate| rate.as_u32().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ConfigResult<T> = Result<T, ConfigError>;
