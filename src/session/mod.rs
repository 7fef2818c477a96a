//! Per-address print session.
//!
//! A [`PrintSession`] ties one transport to the line feeder and the reply
//! classifier and tracks connection, firmware, temperature and job state.
//! It is driven from a single task: transport messages come in through
//! [`PrintSession::handle_transport_message`], timers through
//! [`PrintSession::poll_tick`], and user actions through the public methods.

pub mod model;

use crate::feeder::{FeederError, FeederEvent, LineFeeder};
use crate::port::BaudRate;
use crate::protocol::commands::{
    safety_sequence, CAP_AUTOREPORT_TEMP, ENABLE_TEMPERATURE_AUTOREPORT, HOME_XY,
    REQUEST_FIRMWARE_INFO, REQUEST_TEMPERATURE,
};
use crate::protocol::{classify, ReplyEvent};
use crate::transport::{
    Transport, TransportError, TransportEvent, TransportMessage, TransportSink,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

pub use model::{
    projected_total_seconds, ConnectionState, FirmwareInfo, HeaterTemperature, JobProgress,
    JobState, PrintJob, SessionSnapshot, TemperatureSample,
};

/// Rejected session requests. None of these change session state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a print is already in progress")]
    PrintAlreadyInProgress,

    #[error("printer is not connected")]
    NotConnected,

    #[error("print job has no lines")]
    EmptyJob,

    #[error("no print is active")]
    NoActiveJob,
}

/// Timing and command knobs for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    /// Outstanding temperature polls older than this are given up on.
    pub poll_response_timeout: Duration,
    pub home_command: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            poll_response_timeout: Duration::from_secs(10),
            home_command: HOME_XY.to_string(),
        }
    }
}

/// Hooks a transport drives. [`PrintSession`] is the only implementation;
/// the trait fixes the set of events a session must react to.
pub trait DeviceCallbacks {
    fn on_online(&mut self);
    fn on_offline(&mut self);
    fn on_error(&mut self, detail: &str);
    fn on_line_received(&mut self, line: &str);
    /// Runs the end-of-print safety sequence and retires the active job.
    fn on_print_ended(&mut self, outcome: JobState);
}

#[derive(Debug, Default)]
struct PollState {
    autoreport: bool,
    outstanding_since: Option<Instant>,
    last_temperature_at: Option<Instant>,
}

#[derive(Debug)]
pub struct PrintSession {
    address: String,
    baud_rate: BaudRate,
    auto_connect: bool,
    state: ConnectionState,
    transport: Box<dyn Transport>,
    events: mpsc::UnboundedSender<TransportMessage>,
    generation: u64,
    feeder: LineFeeder,
    settings: SessionSettings,
    firmware: FirmwareInfo,
    temperatures: TemperatureSample,
    poll: PollState,
    job: Option<PrintJob>,
    last_job: Option<PrintJob>,
    last_error: Option<String>,
}

impl PrintSession {
    /// A disconnected session. Transport events for it are delivered into
    /// `events`; whoever drains that channel hands them back through
    /// [`handle_transport_message`](Self::handle_transport_message).
    pub fn new(
        address: impl Into<String>,
        transport: Box<dyn Transport>,
        events: mpsc::UnboundedSender<TransportMessage>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            address: address.into(),
            baud_rate: BaudRate::default(),
            auto_connect: false,
            state: ConnectionState::Disconnected,
            transport,
            events,
            generation: 0,
            feeder: LineFeeder::new(),
            settings,
            firmware: FirmwareInfo::default(),
            temperatures: TemperatureSample::default(),
            poll: PollState::default(),
            job: None,
            last_job: None,
            last_error: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn baud_rate(&self) -> BaudRate {
        self.baud_rate
    }

    /// Takes effect on the next `connect`.
    pub fn set_baud_rate(&mut self, baud_rate: BaudRate) {
        self.baud_rate = baud_rate;
    }

    pub fn auto_connect(&self) -> bool {
        self.auto_connect
    }

    pub fn set_auto_connect(&mut self, auto_connect: bool) {
        self.auto_connect = auto_connect;
    }

    pub fn firmware(&self) -> &FirmwareInfo {
        &self.firmware
    }

    pub fn temperatures(&self) -> &TemperatureSample {
        &self.temperatures
    }

    pub fn job(&self) -> Option<&PrintJob> {
        self.job.as_ref()
    }

    pub fn last_job(&self) -> Option<&PrintJob> {
        self.last_job.as_ref()
    }

    pub fn has_active_job(&self) -> bool {
        self.job.is_some()
    }

    pub fn autoreports_temperatures(&self) -> bool {
        self.poll.autoreport
    }

    /// Open the transport and wait for the device to come online.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Ok(());
        }

        self.firmware = FirmwareInfo::default();
        self.poll = PollState::default();
        self.feeder.reset();
        self.last_error = None;
        self.generation += 1;

        let sink = TransportSink::new(self.address.clone(), self.events.clone())
            .with_generation(self.generation);
        match self.transport.open(&self.address, self.baud_rate, sink) {
            Ok(()) => {
                info!(address = %self.address, baud = %self.baud_rate, "connecting");
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            Err(e) => {
                warn!(address = %self.address, error = %e, "connect failed");
                self.state = ConnectionState::Error;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Close the link. An active print is ended as failed and the safety
    /// sequence is attempted first.
    pub fn disconnect(&mut self) {
        if self.job.is_some() {
            warn!(address = %self.address, "disconnecting with a print in progress");
            self.on_print_ended(JobState::Error);
        }
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        self.poll.outstanding_since = None;
        info!(address = %self.address, "disconnected");
    }

    /// Drop the link for host shutdown. The job is abandoned as-is; no
    /// commands are sent.
    pub fn abandon(&mut self) {
        if let Some(mut job) = self.job.take() {
            warn!(address = %self.address, job = %job.id, "print abandoned at shutdown");
            self.feeder.cancel();
            job.finish(JobState::Cancelled);
            self.last_job = Some(job);
        }
        self.transport.close();
        self.state = ConnectionState::Disconnected;
    }

    /// Route a transport message. Messages from an earlier open of this
    /// address are dropped.
    pub fn handle_transport_message(&mut self, message: TransportMessage) {
        if message.generation != self.generation {
            trace!(
                address = %self.address,
                generation = message.generation,
                "dropping event from stale link"
            );
            return;
        }
        match message.event {
            TransportEvent::Online => self.on_online(),
            TransportEvent::Offline => self.on_offline(),
            TransportEvent::Error(detail) => self.on_error(&detail),
            TransportEvent::Line(line) => self.on_line_received(&line),
        }
    }

    /// Start streaming a job.
    pub fn request_write(
        &mut self,
        lines: Vec<String>,
        estimated_total_seconds: f64,
    ) -> Result<&PrintJob, SessionError> {
        if self.job.is_some() {
            return Err(SessionError::PrintAlreadyInProgress);
        }
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if lines.is_empty() {
            return Err(SessionError::EmptyJob);
        }

        let job = PrintJob::new(lines.len(), estimated_total_seconds);
        info!(
            address = %self.address,
            job = %job.id,
            lines = job.total_lines,
            estimate = estimated_total_seconds,
            "print started"
        );
        self.job = Some(job);

        match self.feeder.start(lines, self.transport.as_mut()) {
            Ok(event) => self.apply_feeder_event(event),
            Err(FeederError::AlreadyActive) | Err(FeederError::EmptyFeed) => {
                self.job = None;
                return Err(SessionError::PrintAlreadyInProgress);
            }
        }
        self.job.as_ref().ok_or(SessionError::NoActiveJob)
    }

    /// Stop the active print and run the safety sequence.
    pub fn cancel_print(&mut self) -> Result<(), SessionError> {
        if self.job.is_none() {
            return Err(SessionError::NoActiveJob);
        }
        info!(address = %self.address, "print cancelled");
        self.on_print_ended(JobState::Cancelled);
        Ok(())
    }

    pub fn pause_print(&mut self) -> Result<(), SessionError> {
        let job = self.job.as_mut().ok_or(SessionError::NoActiveJob)?;
        job.paused = true;
        self.feeder.pause();
        info!(address = %self.address, "print paused");
        Ok(())
    }

    pub fn resume_print(&mut self) -> Result<(), SessionError> {
        let job = self.job.as_mut().ok_or(SessionError::NoActiveJob)?;
        job.paused = false;
        info!(address = %self.address, "print resumed");
        let event = self.feeder.resume(self.transport.as_mut());
        self.apply_feeder_event(event);
        Ok(())
    }

    /// Send a manual command, paced with the job stream.
    pub fn send_command(&mut self, command: &str) -> Result<(), SessionError> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.feeder.send_now(command, self.transport.as_mut());
        Ok(())
    }

    /// Temperature polling timer. Sends `M105` when connected, the firmware
    /// does not push reports itself, no poll is outstanding and the last
    /// temperature line is at least one poll interval old.
    pub fn poll_tick(&mut self, now: Instant) {
        if self.state != ConnectionState::Connected || self.poll.autoreport {
            return;
        }

        if let Some(since) = self.poll.outstanding_since {
            if now.saturating_duration_since(since) < self.settings.poll_response_timeout {
                return;
            }
            warn!(
                address = %self.address,
                waited_ms = now.saturating_duration_since(since).as_millis() as u64,
                "temperature poll went unanswered"
            );
            self.poll.outstanding_since = None;
            self.feeder.release_stalled(self.transport.as_mut());
        }

        if let Some(last) = self.poll.last_temperature_at {
            if now.saturating_duration_since(last) < self.settings.poll_interval {
                return;
            }
        }

        if !self.feeder.is_queued(REQUEST_TEMPERATURE) {
            self.feeder.send_now(REQUEST_TEMPERATURE, self.transport.as_mut());
        }
        self.poll.outstanding_since = Some(now);
    }

    /// Refresh the projected duration of the active job.
    pub fn on_print_progress(&mut self, now: Instant) -> Option<JobProgress> {
        let job = self.job.as_mut()?;
        let progress = job.progress_at(now);
        job.projected_total_seconds = progress.projected_total_seconds;
        Some(progress)
    }

    /// The device reported a fatal error (`!!`). The job is aborted; the
    /// connection itself stays up.
    pub fn on_fatal_error(&mut self, detail: &str) {
        warn!(address = %self.address, detail, "device reported a fatal error");
        self.last_error = Some(detail.to_string());
        self.on_print_ended(JobState::Error);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = Instant::now();
        SessionSnapshot {
            address: self.address.clone(),
            baud_rate: self.baud_rate,
            auto_connect: self.auto_connect,
            state: self.state,
            firmware: self.firmware.clone(),
            temperatures: self.temperatures.clone(),
            autoreport_temperatures: self.poll.autoreport,
            job: self.job.as_ref().map(|job| job.progress_at(now)),
            last_job: self.last_job.as_ref().map(|job| job.progress_at(now)),
            last_error: self.last_error.clone(),
        }
    }

    fn on_ack(&mut self) {
        let event = self.feeder.on_ack(self.transport.as_mut());
        self.apply_feeder_event(event);
    }

    fn apply_feeder_event(&mut self, event: Option<FeederEvent>) {
        match event {
            Some(FeederEvent::LineSent { index }) => {
                if let Some(job) = self.job.as_mut() {
                    job.line_sent(index);
                }
                self.on_print_progress(Instant::now());
            }
            Some(FeederEvent::Exhausted) => {
                info!(address = %self.address, "print completed");
                self.on_print_ended(JobState::Completed);
            }
            None => {}
        }
    }

    fn on_capabilities(&mut self, capabilities: std::collections::BTreeMap<String, bool>) {
        let autoreport = capabilities.get(CAP_AUTOREPORT_TEMP).copied().unwrap_or(false);
        self.firmware.capabilities.extend(capabilities);

        if autoreport && !self.poll.autoreport {
            info!(address = %self.address, "firmware pushes temperatures, polling disabled");
            self.poll.autoreport = true;
            self.poll.outstanding_since = None;
            self.feeder
                .send_now(ENABLE_TEMPERATURE_AUTOREPORT, self.transport.as_mut());
        }
    }
}

impl DeviceCallbacks for PrintSession {
    fn on_online(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!(address = %self.address, state = ?self.state, "ignoring online event");
            return;
        }
        info!(address = %self.address, "printer online");
        self.state = ConnectionState::Connected;
        self.poll = PollState::default();
        self.feeder
            .send_now(REQUEST_FIRMWARE_INFO, self.transport.as_mut());
    }

    fn on_offline(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if self.job.is_some() {
            warn!(address = %self.address, "link lost during print");
            self.on_print_ended(JobState::Error);
        }
        self.transport.close();
        self.poll.outstanding_since = None;
        if self.state != ConnectionState::Error {
            self.state = ConnectionState::Disconnected;
        }
        info!(address = %self.address, "printer offline");
    }

    fn on_error(&mut self, detail: &str) {
        warn!(address = %self.address, detail, "transport error");
        self.state = ConnectionState::Error;
        self.last_error = Some(detail.to_string());
        if self.job.is_some() {
            self.on_print_ended(JobState::Error);
        }
    }

    fn on_line_received(&mut self, line: &str) {
        trace!(address = %self.address, line, "received");
        match classify(line) {
            ReplyEvent::FatalError(detail) => self.on_fatal_error(&detail),
            ReplyEvent::FirmwareIdentified(name) => {
                info!(address = %self.address, firmware = %name, "firmware identified");
                self.firmware.name = name;
            }
            ReplyEvent::CapabilitiesReported(capabilities) => self.on_capabilities(capabilities),
            ReplyEvent::TemperatureReported(report) => {
                self.temperatures.apply(&report);
                self.poll.last_temperature_at = Some(Instant::now());
                self.poll.outstanding_since = None;
                if report.acknowledges {
                    self.on_ack();
                }
            }
            ReplyEvent::Acknowledged => self.on_ack(),
            ReplyEvent::Unrecognized(_) => {}
        }
    }

    fn on_print_ended(&mut self, outcome: JobState) {
        let dropped = self.feeder.cancel();
        if !dropped.is_empty() {
            debug!(address = %self.address, commands = ?dropped, "discarding queued commands");
            self.poll.outstanding_since = None;
        }

        self.feeder.send_unpaced(
            safety_sequence(&self.settings.home_command),
            self.transport.as_mut(),
        );

        if let Some(mut job) = self.job.take() {
            job.finish(outcome);
            info!(
                address = %self.address,
                job = %job.id,
                outcome = ?outcome,
                lines_sent = job.lines_sent,
                total_lines = job.total_lines,
                "print ended"
            );
            self.last_job = Some(job);
        }
    }
}
