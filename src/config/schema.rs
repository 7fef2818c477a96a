//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration.

use super::error::{ConfigError, ConfigResult};
use crate::port::BaudRate;
use crate::protocol::commands::HOME_XY;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub discovery: DiscoveryConfig,
    pub session: SessionConfig,
    /// Printer profile used when no host application supplies one.
    pub profile: ProfileConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::invalid("serial.read_timeout_ms", "must be positive"));
        }
        if self.serial.handshake_idle_reads == 0 {
            return Err(ConfigError::invalid(
                "serial.handshake_idle_reads",
                "must be positive",
            ));
        }
        if self.discovery.interval_ms == 0 {
            return Err(ConfigError::invalid("discovery.interval_ms", "must be positive"));
        }
        if self.session.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("session.poll_interval_ms", "must be positive"));
        }
        if self.session.poll_response_timeout_ms < self.session.poll_interval_ms {
            return Err(ConfigError::invalid(
                "session.poll_response_timeout_ms",
                "must not be shorter than session.poll_interval_ms",
            ));
        }
        if self.session.home_command.trim().is_empty() {
            return Err(ConfigError::invalid("session.home_command", "must not be empty"));
        }
        if let Some(port) = &self.profile.port {
            if self.discovery.exclude_ports.contains(port) {
                return Err(ConfigError::ExcludedProfilePort { port: port.clone() });
            }
        }
        Ok(())
    }
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Rate for printers that are not the profile's printer.
    pub default_baud: BaudRate,
    /// How long one blocking read waits for data.
    pub read_timeout_ms: u64,
    /// Empty reads before the handshake probe is repeated.
    pub handshake_idle_reads: u32,
    /// Short names for port addresses, e.g. `ender = "/dev/ttyUSB0"`.
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: BaudRate::B115200,
            read_timeout_ms: 250,
            handshake_idle_reads: 15,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Never treat these addresses as printers.
    pub exclude_ports: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5000,
            exclude_ports: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub poll_interval_ms: u64,
    pub poll_response_timeout_ms: u64,
    /// Head parking command of the end-of-print sequence.
    pub home_command: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            poll_response_timeout_ms: 10_000,
            home_command: HOME_XY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub port: Option<String>,
    pub baud: BaudRate,
    pub auto_connect: bool,
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or
    /// `serial_print_host=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}
