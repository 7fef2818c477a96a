//! Observable session data.

use crate::port::BaudRate;
use crate::protocol::{TemperatureReading, TemperatureReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Progress fraction after which the running estimate replaces the
/// producer's original one.
pub const PROJECTION_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// `Idle` covers an accepted job whose first line is still waiting for
/// the link to free up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Printing,
    Error,
    Completed,
    Cancelled,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Error | JobState::Completed | JobState::Cancelled)
    }
}

/// One accepted write request.
#[derive(Debug, Clone, Serialize)]
pub struct PrintJob {
    pub id: Uuid,
    pub total_lines: usize,
    pub lines_sent: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub estimated_total_seconds: f64,
    pub projected_total_seconds: f64,
    pub state: JobState,
    pub paused: bool,
    #[serde(skip)]
    pub(crate) started: Instant,
    #[serde(skip)]
    ended: Option<Instant>,
}

impl PrintJob {
    pub fn new(total_lines: usize, estimated_total_seconds: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            total_lines,
            lines_sent: 0,
            started_at: Utc::now(),
            finished_at: None,
            estimated_total_seconds,
            projected_total_seconds: estimated_total_seconds,
            state: JobState::Idle,
            paused: false,
            started: Instant::now(),
            ended: None,
        }
    }

    /// Record that line `index` went out.
    pub fn line_sent(&mut self, index: usize) {
        self.lines_sent = index + 1;
        if self.state == JobState::Idle {
            self.state = JobState::Printing;
        }
    }

    /// Retire the job with `outcome`. Elapsed time freezes here; a job that
    /// already finished keeps its first outcome.
    pub fn finish(&mut self, outcome: JobState) {
        if self.state.is_finished() {
            return;
        }
        self.state = outcome;
        self.paused = false;
        self.finished_at = Some(Utc::now());
        self.ended = Some(Instant::now());
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.ended.unwrap_or(now).saturating_duration_since(self.started)
    }

    /// Fraction of lines handed to the device.
    pub fn progress(&self) -> f64 {
        if self.total_lines == 0 {
            return 0.0;
        }
        self.lines_sent as f64 / self.total_lines as f64
    }

    pub fn progress_at(&self, now: Instant) -> JobProgress {
        let elapsed = self.elapsed(now).as_secs_f64();
        let projected = projected_total_seconds(self.estimated_total_seconds, self.progress(), elapsed);
        JobProgress {
            id: self.id,
            state: self.state,
            total_lines: self.total_lines,
            lines_sent: self.lines_sent,
            progress: self.progress(),
            paused: self.paused,
            started_at: self.started_at,
            finished_at: self.finished_at,
            elapsed_seconds: elapsed,
            projected_total_seconds: projected,
            remaining_seconds: (projected - elapsed).max(0.0),
        }
    }
}

/// Estimated total duration of a job.
///
/// Below [`PROJECTION_THRESHOLD`] the producer's estimate is kept. Past it,
/// the unfinished share of the estimate is added to the time already spent.
pub fn projected_total_seconds(estimate: f64, progress: f64, elapsed: f64) -> f64 {
    if progress > PROJECTION_THRESHOLD {
        estimate * (1.0 - progress) + elapsed
    } else {
        estimate
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub id: Uuid,
    pub state: JobState,
    pub total_lines: usize,
    pub lines_sent: usize,
    pub progress: f64,
    pub paused: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: f64,
    pub projected_total_seconds: f64,
    pub remaining_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub name: String,
    pub capabilities: BTreeMap<String, bool>,
}

impl Default for FirmwareInfo {
    fn default() -> Self {
        Self {
            name: crate::protocol::reply::UNKNOWN_FIRMWARE.to_string(),
            capabilities: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaterTemperature {
    pub current: f64,
    pub target: f64,
}

impl HeaterTemperature {
    fn apply(&mut self, reading: TemperatureReading) {
        self.current = reading.current;
        if let Some(target) = reading.target {
            self.target = target;
        }
    }
}

/// Latest heater readings. Entries are updated in place, never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    pub extruders: BTreeMap<usize, HeaterTemperature>,
    pub bed: Option<HeaterTemperature>,
}

impl TemperatureSample {
    pub fn apply(&mut self, report: &TemperatureReport) {
        for (index, reading) in &report.extruders {
            self.extruders.entry(*index).or_default().apply(*reading);
        }
        if let Some(reading) = report.bed {
            self.bed.get_or_insert_with(HeaterTemperature::default).apply(reading);
        }
    }
}

/// Everything an observer may want to know about one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub address: String,
    pub baud_rate: BaudRate,
    pub auto_connect: bool,
    pub state: ConnectionState,
    pub firmware: FirmwareInfo,
    pub temperatures: TemperatureSample,
    pub autoreport_temperatures: bool,
    pub job: Option<JobProgress>,
    pub last_job: Option<JobProgress>,
    pub last_error: Option<String>,
}
