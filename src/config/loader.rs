//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use crate::port::BaudRate;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_PRINT";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_PRINT_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_PRINT_CONFIG` environment variable (explicit path)
    /// 2. `./config.toml` (current directory)
    /// 3. the platform config directory (`~/.config/serial-print-host/` on Linux)
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values, then the result is
    /// validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Defaults plus environment overrides; bad overrides are ignored.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if apply_env_overrides(&mut config).is_err() || config.validate().is_err() {
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to the file it was loaded from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or(ConfigError::NoBackingFile)?;

        save_to_file(&self.config, path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|path| path.exists())
}

/// Platform config directory for this application.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-print-host").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn env_var(key: &str) -> Option<(String, String)> {
    let name = format!("{}_{}", ENV_PREFIX, key);
    std::env::var(&name).ok().map(|value| (name, value))
}

fn env_parse<T: FromStr>(key: &str, what: &str) -> ConfigResult<Option<T>> {
    match env_var(key) {
        Some((name, value)) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env(name, format!("not a valid {what}"))),
        None => Ok(None),
    }
}

fn env_baud(key: &str) -> ConfigResult<Option<BaudRate>> {
    match env_parse::<u32>(key, "baud rate")? {
        Some(value) => BaudRate::try_from(value)
            .map(Some)
            .map_err(|_| ConfigError::UnsupportedBaud {
                origin: format!("{}_{}", ENV_PREFIX, key),
                value,
            }),
        None => Ok(None),
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_var(key).map(|(_, value)| {
        let value = value.trim().to_ascii_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_PRINT_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_PRINT_SERIAL_DEFAULT_BAUD=250000`
/// - `SERIAL_PRINT_PROFILE_PORT=/dev/ttyUSB0`
/// - `SERIAL_PRINT_DISCOVERY_EXCLUDE_PORTS=/dev/ttyS0,/dev/ttyS1`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some(baud) = env_baud("SERIAL_DEFAULT_BAUD")? {
        config.serial.default_baud = baud;
    }
    if let Some(ms) = env_parse("SERIAL_READ_TIMEOUT_MS", "timeout")? {
        config.serial.read_timeout_ms = ms;
    }
    if let Some(reads) = env_parse("SERIAL_HANDSHAKE_IDLE_READS", "read count")? {
        config.serial.handshake_idle_reads = reads;
    }

    if let Some(enabled) = env_bool("DISCOVERY_ENABLED") {
        config.discovery.enabled = enabled;
    }
    if let Some(ms) = env_parse("DISCOVERY_INTERVAL_MS", "interval")? {
        config.discovery.interval_ms = ms;
    }
    if let Some((_, ports)) = env_var("DISCOVERY_EXCLUDE_PORTS") {
        config.discovery.exclude_ports = ports
            .split(',')
            .map(str::trim)
            .filter(|port| !port.is_empty())
            .map(str::to_string)
            .collect();
    }

    if let Some(ms) = env_parse("SESSION_POLL_INTERVAL_MS", "interval")? {
        config.session.poll_interval_ms = ms;
    }
    if let Some(ms) = env_parse("SESSION_POLL_RESPONSE_TIMEOUT_MS", "timeout")? {
        config.session.poll_response_timeout_ms = ms;
    }
    if let Some((_, command)) = env_var("SESSION_HOME_COMMAND") {
        config.session.home_command = command;
    }

    if let Some((_, port)) = env_var("PROFILE_PORT") {
        config.profile.port = Some(port).filter(|port| !port.is_empty());
    }
    if let Some(baud) = env_baud("PROFILE_BAUD")? {
        config.profile.baud = baud;
    }
    if let Some(enabled) = env_bool("PROFILE_AUTO_CONNECT") {
        config.profile.auto_connect = enabled;
    }

    if let Some((_, level)) = env_var("LOGGING_LEVEL") {
        config.logging.level = level;
    }
    if let Some((name, format)) = env_var("LOGGING_FORMAT") {
        config.logging.format = format
            .parse()
            .map_err(|message: String| ConfigError::env(name, message))?;
    }

    Ok(())
}
