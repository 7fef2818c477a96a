//! Client side of the engine task.

use super::shutdown::ShutdownPrompt;
use crate::port::BaudRate;
use crate::session::{SessionError, SessionSnapshot};
use crate::transport::TransportError;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine task is not running")]
    Closed,

    #[error("no printer at {0}")]
    UnknownAddress(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Requests handled by the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    Connect {
        address: String,
        respond_to: Reply<()>,
    },
    Disconnect {
        address: String,
        respond_to: Reply<()>,
    },
    SetBaudRate {
        address: String,
        baud_rate: BaudRate,
        respond_to: Reply<()>,
    },
    SetAutoConnect {
        address: String,
        enabled: bool,
        respond_to: Reply<()>,
    },
    RequestWrite {
        address: String,
        lines: Vec<String>,
        estimated_total_seconds: f64,
        respond_to: Reply<Uuid>,
    },
    CancelPrint {
        address: String,
        respond_to: Reply<()>,
    },
    PausePrint {
        address: String,
        respond_to: Reply<()>,
    },
    ResumePrint {
        address: String,
        respond_to: Reply<()>,
    },
    SendCommand {
        address: String,
        command: String,
        respond_to: Reply<()>,
    },
    Snapshot {
        address: String,
        respond_to: Reply<SessionSnapshot>,
    },
    Snapshots {
        respond_to: oneshot::Sender<Vec<SessionSnapshot>>,
    },
    ListPorts {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    /// Addresses currently connected, i.e. usable as output devices.
    OutputDevices {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    ActivePrints {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    /// The printer profile was edited or swapped; re-read it.
    ProfileChanged {
        respond_to: oneshot::Sender<()>,
    },
    /// Abandon everything and stop the engine task.
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { tx }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(build(respond_to)).map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        self.call(build).await?
    }

    pub async fn connect(&self, address: &str) -> Result<(), EngineError> {
        let address = address.to_string();
        self.request(|respond_to| EngineCommand::Connect { address, respond_to })
            .await
    }

    pub async fn disconnect(&self, address: &str) -> Result<(), EngineError> {
        let address = address.to_string();
        self.request(|respond_to| EngineCommand::Disconnect { address, respond_to })
            .await
    }

    /// Set the rate used on the next connect and store it in the profile.
    pub async fn set_baud_rate(&self, address: &str, baud_rate: BaudRate) -> Result<(), EngineError> {
        let address = address.to_string();
        self.request(|respond_to| EngineCommand::SetBaudRate {
            address,
            baud_rate,
            respond_to,
        })
        .await
    }

    pub async fn set_auto_connect(&self, address: &str, enabled: bool) -> Result<(), EngineError> {
        let address = address.to_string();
        self.request(|respond_to| EngineCommand::SetAutoConnect {
            address,
            enabled,
            respond_to,
        })
        .await
    }

    /// Start a print; returns the job id.
    pub async fn request_write(
        &self,
        address: &str,
        lines: Vec<String>,
        estimated_total_seconds: f64,
    ) -> Result<Uuid, EngineError> {
        let address = address.to_string();
        self.request(|respond_to| EngineCommand::RequestWrite {
            address,
            lines,
            estimated_total_seconds,
            respond_to,
        })
        .await
    }

    pub async fn cancel_print(&self, address: &str) -> Result<(), EngineError> {
        let address = address.to_string();
        self.request(|respond_to| EngineCommand::CancelPrint { address, respond_to })
            .await
    }

    pub async fn pause_print(&self, address: &str) -> Result<(), EngineError> {
        let address = address.to_string();
        self.request(|respond_to| EngineCommand::PausePrint { address, respond_to })
            .await
    }

    pub async fn resume_print(&self, address: &str) -> Result<(), EngineError> {
        let address = address.to_string();
        self.request(|respond_to| EngineCommand::ResumePrint { address, respond_to })
            .await
    }

    pub async fn send_command(&self, address: &str, command: &str) -> Result<(), EngineError> {
        let address = address.to_string();
        let command = command.to_string();
        self.request(|respond_to| EngineCommand::SendCommand {
            address,
            command,
            respond_to,
        })
        .await
    }

    pub async fn snapshot(&self, address: &str) -> Result<SessionSnapshot, EngineError> {
        let address = address.to_string();
        self.request(|respond_to| EngineCommand::Snapshot { address, respond_to })
            .await
    }

    pub async fn snapshots(&self) -> Result<Vec<SessionSnapshot>, EngineError> {
        self.call(|respond_to| EngineCommand::Snapshots { respond_to }).await
    }

    /// Ports seen by the latest discovery cycle.
    pub async fn list_ports(&self) -> Result<Vec<String>, EngineError> {
        self.call(|respond_to| EngineCommand::ListPorts { respond_to }).await
    }

    pub async fn output_devices(&self) -> Result<Vec<String>, EngineError> {
        self.call(|respond_to| EngineCommand::OutputDevices { respond_to }).await
    }

    pub async fn active_prints(&self) -> Result<Vec<String>, EngineError> {
        self.call(|respond_to| EngineCommand::ActivePrints { respond_to }).await
    }

    pub async fn profile_changed(&self) -> Result<(), EngineError> {
        self.call(|respond_to| EngineCommand::ProfileChanged { respond_to }).await
    }

    /// Shutdown guard. With prints running, `prompt` decides; a declined
    /// shutdown leaves everything untouched and returns `Ok(false)`. An
    /// accepted one closes every connection without the end-of-print
    /// sequence and stops the engine.
    pub async fn request_shutdown(&self, prompt: &dyn ShutdownPrompt) -> Result<bool, EngineError> {
        let active = self.active_prints().await?;
        if !active.is_empty() && !prompt.confirm_shutdown(&active).await {
            info!(printers = ?active, "shutdown declined");
            return Ok(false);
        }
        self.call(|respond_to| EngineCommand::Shutdown { respond_to }).await?;
        Ok(true)
    }
}
