//! Ack-paced streaming of job lines.
//!
//! The device gets one line, answers `ok`, gets the next. Out-of-band
//! commands (temperature polls, manual commands) share the same pacing so
//! the device never holds more than one unacknowledged line. Every line
//! written through the feeder is counted until its `ok` arrives, including
//! commands sent while no job is running.

use crate::transport::Transport;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeederError {
    #[error("a feed is already active")]
    AlreadyActive,

    #[error("progress is undefined for an empty feed")]
    EmptyFeed,
}

/// What an acknowledgement (or resume) caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederEvent {
    /// The job line at `index` went out.
    LineSent { index: usize },
    /// The last line was acknowledged; the feed is no longer active.
    Exhausted,
}

#[derive(Debug, Default)]
pub struct LineFeeder {
    lines: Vec<String>,
    cursor: usize,
    active: bool,
    paused: bool,
    /// Lines written and not yet acknowledged.
    in_flight: usize,
    priority: VecDeque<String>,
}

impl LineFeeder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin streaming `lines`. The first line is written right away unless
    /// an earlier command is still waiting for its `ok`; it then goes out on
    /// that acknowledgement.
    pub fn start(
        &mut self,
        lines: Vec<String>,
        transport: &mut dyn Transport,
    ) -> Result<Option<FeederEvent>, FeederError> {
        if self.active {
            return Err(FeederError::AlreadyActive);
        }

        self.lines = lines;
        self.cursor = 0;
        self.paused = false;
        self.active = !self.lines.is_empty();
        debug!(total = self.lines.len(), "feed started");

        if !self.active || self.in_flight > 0 {
            return Ok(None);
        }
        Ok(self.send_next(transport))
    }

    /// Handle one `ok` from the device.
    pub fn on_ack(&mut self, transport: &mut dyn Transport) -> Option<FeederEvent> {
        if self.in_flight == 0 {
            trace!("unsolicited ok");
            return None;
        }
        self.in_flight -= 1;
        if self.in_flight > 0 {
            return None;
        }

        if let Some(command) = self.priority.pop_front() {
            trace!(command = %command, "sending queued command");
            self.write(transport, &command);
            return None;
        }
        if !self.active || self.paused {
            return None;
        }
        if self.cursor == self.lines.len() {
            self.active = false;
            debug!(total = self.lines.len(), "feed exhausted");
            return Some(FeederEvent::Exhausted);
        }
        self.send_next(transport)
    }

    /// Out-of-band command. Waits for the in-flight line's ack if there is
    /// one, jumping ahead of the remaining job lines.
    pub fn send_now(&mut self, command: &str, transport: &mut dyn Transport) {
        if self.in_flight > 0 {
            trace!(command, "queued behind in-flight line");
            self.priority.push_back(command.to_string());
        } else {
            self.write(transport, command);
        }
    }

    /// Write `commands` back to back without waiting for acknowledgements.
    /// Each still owes an `ok`, so later lines wait for all of them.
    pub fn send_unpaced<'a>(
        &mut self,
        commands: impl IntoIterator<Item = &'a str>,
        transport: &mut dyn Transport,
    ) {
        for command in commands {
            self.write(transport, command);
        }
    }

    /// Forget outstanding acknowledgements when no job is running and the
    /// device has gone quiet. The next queued command, if any, goes out.
    pub fn release_stalled(&mut self, transport: &mut dyn Transport) {
        if self.active || self.in_flight == 0 {
            return;
        }
        debug!(in_flight = self.in_flight, "giving up on outstanding acknowledgements");
        self.in_flight = 0;
        if let Some(command) = self.priority.pop_front() {
            self.write(transport, &command);
        }
    }

    /// Drop everything tied to the current link.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_queued(&self, command: &str) -> bool {
        self.priority.iter().any(|queued| queued == command)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Stop sending job lines on acknowledgement.
    pub fn pause(&mut self) {
        if self.active {
            self.paused = true;
        }
    }

    pub fn resume(&mut self, transport: &mut dyn Transport) -> Option<FeederEvent> {
        if !self.active || !self.paused {
            return None;
        }
        self.paused = false;
        if self.in_flight > 0 {
            return None;
        }
        if self.cursor == self.lines.len() {
            self.active = false;
            return Some(FeederEvent::Exhausted);
        }
        self.send_next(transport)
    }

    /// Halt the feed. Nothing is written; out-of-band commands still queued
    /// are handed back to the caller. The line in flight still owes its `ok`.
    pub fn cancel(&mut self) -> Vec<String> {
        if self.active {
            debug!(cursor = self.cursor, total = self.lines.len(), "feed cancelled");
        }
        self.active = false;
        self.paused = false;
        self.priority.drain(..).collect()
    }

    pub fn progress(&self) -> Result<f64, FeederError> {
        if self.lines.is_empty() {
            return Err(FeederError::EmptyFeed);
        }
        Ok(self.cursor as f64 / self.lines.len() as f64)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total(&self) -> usize {
        self.lines.len()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn send_next(&mut self, transport: &mut dyn Transport) -> Option<FeederEvent> {
        let index = self.cursor;
        let line = self.lines.get(index)?.clone();
        self.write(transport, &line);
        self.cursor += 1;
        Some(FeederEvent::LineSent { index })
    }

    fn write(&mut self, transport: &mut dyn Transport, line: &str) {
        transport.write_line(line);
        self.in_flight += 1;
    }
}
