//! Printer profile storage.
//!
//! The host application owns the printer profile; the engine only reads and
//! writes three string keys through [`ProfileStore`].

use crate::port::BaudRate;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

pub const KEY_SERIAL_PORT: &str = "serial_port";
pub const KEY_SERIAL_RATE: &str = "serial_rate";
pub const KEY_SERIAL_AUTO_CONNECT: &str = "serial_auto_connect";

/// String key/value access to the active printer profile.
pub trait ProfileStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// In-process profile store.
#[derive(Debug, Clone, Default)]
pub struct MemoryProfileStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded from a typed profile.
    pub fn from_profile(profile: &PrinterProfile) -> Self {
        let store = Self::new();
        profile.write_to(&store);
        store
    }
}

impl ProfileStore for MemoryProfileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }
}

/// Typed view of the serial keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrinterProfile {
    pub port: Option<String>,
    pub baud_rate: BaudRate,
    pub auto_connect: bool,
}

impl PrinterProfile {
    /// Read the profile; missing or unparsable values fall back to defaults.
    pub fn read_from(store: &dyn ProfileStore) -> Self {
        let port = store.get(KEY_SERIAL_PORT).filter(|port| !port.is_empty());

        let baud_rate = store
            .get(KEY_SERIAL_RATE)
            .and_then(|raw| match raw.trim().parse::<u32>() {
                Ok(value) => BaudRate::try_from(value).ok(),
                Err(_) => None,
            })
            .unwrap_or_else(|| {
                if let Some(raw) = store.get(KEY_SERIAL_RATE) {
                    warn!(value = %raw, "ignoring unsupported profile baud rate");
                }
                BaudRate::default()
            });

        let auto_connect = store
            .get(KEY_SERIAL_AUTO_CONNECT)
            .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Self {
            port,
            baud_rate,
            auto_connect,
        }
    }

    pub fn write_to(&self, store: &dyn ProfileStore) {
        store.set(KEY_SERIAL_PORT, self.port.as_deref().unwrap_or(""));
        store.set(KEY_SERIAL_RATE, &self.baud_rate.to_string());
        store.set(KEY_SERIAL_AUTO_CONNECT, if self.auto_connect { "true" } else { "false" });
    }

    /// True if `address` is the profile's printer and it should be opened
    /// as soon as it shows up.
    ///
    /// Only discovery consults this. Switching to a profile (or editing it)
    /// is an explicit user action, so the engine then connects the profile's
    /// printer whatever `auto_connect` says.
    pub fn wants_auto_connect(&self, address: &str) -> bool {
        self.auto_connect && self.port.as_deref() == Some(address)
    }
}
