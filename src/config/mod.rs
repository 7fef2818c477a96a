//! Configuration module.
//!
//! TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_PRINT_CONFIG` environment variable (explicit path)
//! 2. `./config.toml` (current directory)
//! 3. the platform config directory, e.g. `~/.config/serial-print-host/config.toml`
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any configuration value can be overridden with
//! `SERIAL_PRINT_<SECTION>_<KEY>`, e.g. `SERIAL_PRINT_SESSION_POLL_INTERVAL_MS=1000`.
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_print_host::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! println!("Default baud: {}", loader.config().serial.default_baud);
//! # Ok::<(), serial_print_host::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, DiscoveryConfig, LogFormat, LoggingConfig, ProfileConfig, SerialConfig,
    SessionConfig,
};
