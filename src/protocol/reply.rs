//! Reply classifier.
//!
//! Turns one line received from the device into a [`ReplyEvent`]. The checks
//! run in a fixed order and the first match wins, because a firmware banner
//! can also contain `Cap:` text and a temperature report can start with `ok`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

const FATAL_PREFIX: &str = "!!";
const FIRMWARE_MARKER: &str = "FIRMWARE_NAME:";
const CAPABILITY_MARKER: &str = "Cap:";
const ACK_PREFIX: &str = "ok";

/// Name reported when a firmware banner cannot be parsed.
pub const UNKNOWN_FIRMWARE: &str = "Unknown";

static FIRMWARE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"FIRMWARE_NAME:(.*?);").expect("invalid firmware regex"));

static CAPABILITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Cap:([A-Za-z0-9_]+):([01])").expect("invalid capability regex"));

static EXTRUDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)T(\d*):\s*(-?\d+(?:\.\d+)?)(?:\s*/\s*(-?\d+(?:\.\d+)?))?")
        .expect("invalid extruder temperature regex")
});

static BED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)B:\s*(-?\d+(?:\.\d+)?)(?:\s*/\s*(-?\d+(?:\.\d+)?))?")
        .expect("invalid bed temperature regex")
});

/// One heater reading. `target` is `None` when the report omitted it, which
/// means "leave the stored target alone".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub current: f64,
    pub target: Option<f64>,
}

/// Parsed temperature line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReport {
    /// Extruder index to reading; the first entry for an index wins.
    pub extruders: BTreeMap<usize, TemperatureReading>,
    pub bed: Option<TemperatureReading>,
    /// The line also started with `ok`, i.e. it answers a command.
    pub acknowledges: bool,
}

/// Classification of one inbound line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ReplyEvent {
    FatalError(String),
    FirmwareIdentified(String),
    CapabilitiesReported(BTreeMap<String, bool>),
    TemperatureReported(TemperatureReport),
    Acknowledged,
    Unrecognized(String),
}

/// A line carried a marker but its payload could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("temperature marker without a readable value in {0:?}")]
    NoTemperatureValues(String),
}

/// Classify a single line received from the device.
pub fn classify(line: &str) -> ReplyEvent {
    let line = line.trim_end();

    if line.starts_with(FATAL_PREFIX) {
        return ReplyEvent::FatalError(line.to_string());
    }

    if line.contains(FIRMWARE_MARKER) {
        return ReplyEvent::FirmwareIdentified(parse_firmware_name(line));
    }

    if line.contains(CAPABILITY_MARKER) {
        return ReplyEvent::CapabilitiesReported(parse_capabilities(line));
    }

    if line.contains(" T:") || line.contains(" B:") {
        match parse_temperatures(line) {
            Ok(report) => return ReplyEvent::TemperatureReported(report),
            Err(e) => debug!(error = %e, "ignoring malformed temperature report"),
        }
    }

    if line.starts_with(ACK_PREFIX) {
        return ReplyEvent::Acknowledged;
    }

    ReplyEvent::Unrecognized(line.to_string())
}

fn parse_firmware_name(line: &str) -> String {
    FIRMWARE_NAME_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|name| name.as_str().trim().to_string())
        .unwrap_or_else(|| UNKNOWN_FIRMWARE.to_string())
}

fn parse_capabilities(line: &str) -> BTreeMap<String, bool> {
    CAPABILITY_RE
        .captures_iter(line)
        .map(|caps| (caps[1].to_string(), &caps[2] == "1"))
        .collect()
}

/// Parse `T<n>:cur[/target]` and `B:cur[/target]` entries.
///
/// Fails only when the line has a marker but nothing readable at all.
pub fn parse_temperatures(line: &str) -> Result<TemperatureReport, ProtocolError> {
    let mut report = TemperatureReport {
        acknowledges: line.starts_with(ACK_PREFIX),
        ..Default::default()
    };

    for caps in EXTRUDER_RE.captures_iter(line) {
        let index = match caps.get(1).map(|m| m.as_str()) {
            Some("") | None => 0,
            Some(digits) => match digits.parse::<usize>() {
                Ok(index) => index,
                Err(_) => continue,
            },
        };
        if let Some(reading) = reading_from(caps.get(2), caps.get(3)) {
            report.extruders.entry(index).or_insert(reading);
        }
    }

    report.bed = BED_RE
        .captures(line)
        .and_then(|caps| reading_from(caps.get(1), caps.get(2)));

    if report.extruders.is_empty() && report.bed.is_none() {
        return Err(ProtocolError::NoTemperatureValues(line.to_string()));
    }
    Ok(report)
}

fn reading_from(
    current: Option<regex::Match<'_>>,
    target: Option<regex::Match<'_>>,
) -> Option<TemperatureReading> {
    let current = current?.as_str().parse::<f64>().ok()?;
    let target = target.and_then(|m| m.as_str().parse::<f64>().ok());
    Some(TemperatureReading { current, target })
}
