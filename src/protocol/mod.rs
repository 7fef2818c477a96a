//! Printer text protocol: outgoing command vocabulary, G-code line framing and
//! the classifier for inbound replies.

pub mod commands;
pub mod gcode;
pub mod reply;

pub use gcode::prepare_lines;
pub use reply::{
    classify, parse_temperatures, ProtocolError, ReplyEvent, TemperatureReading, TemperatureReport,
};
