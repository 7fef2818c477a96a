use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serial_print_host::config::{Config, ConfigLoader};
use serial_print_host::discovery::{DiscoveryEvent, DiscoveryLoop, SystemPortEnumerator};
use serial_print_host::engine::{Engine, EngineError, EngineHandle, EngineSettings, ShutdownPrompt};
use serial_print_host::error::{AppError, AppResult};
use serial_print_host::logging::init_logging;
use serial_print_host::port::BaudRate;
use serial_print_host::profile::{MemoryProfileStore, PrinterProfile};
use serial_print_host::protocol::prepare_lines;
use serial_print_host::session::{ConnectionState, JobState, SessionSnapshot};
use serial_print_host::transport::{SerialTransportFactory, SerialTransportSettings};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "serial-print-host",
    version,
    about = "Stream G-code to serial-connected 3D printers."
)]
struct Cli {
    /// Configuration file (overrides the usual search path).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports.
    Ports {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Watch ports come and go, connecting the profile printer when it appears.
    Watch,
    /// Print a G-code file.
    Print {
        file: PathBuf,
        /// Port address or alias; defaults to the profile port.
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short, long)]
        baud: Option<u32>,
        /// Producer's estimate of the total print time, in seconds.
        #[arg(short, long, default_value_t = 0.0)]
        estimate: f64,
    },
    /// Connect and show temperatures; stdin lines are sent as commands.
    Monitor {
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short, long)]
        baud: Option<u32>,
    },
}

/// Asks on the terminal before abandoning running prints.
struct StdinPrompt;

#[async_trait]
impl ShutdownPrompt for StdinPrompt {
    async fn confirm_shutdown(&self, active: &[String]) -> bool {
        let question = format!(
            "A print is running on {}. Quit anyway and abandon it? [y/N] ",
            active.join(", ")
        );
        let answer = tokio::task::spawn_blocking(move || {
            eprint!("{question}");
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;
        matches!(answer, Ok(Ok(line)) if matches!(line.trim(), "y" | "Y" | "yes"))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let loader = match cli.config {
        Some(ref path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config = loader.into_config();
    init_logging(&config.logging)?;
    if let Some(path) = cli.config.as_ref() {
        info!(path = %path.display(), "configuration loaded");
    }

    match cli.command {
        Command::Ports { json } => list_ports(&config, json),
        Command::Watch => watch(&config).await,
        Command::Print {
            file,
            port,
            baud,
            estimate,
        } => print_file(&config, file, port, baud, estimate).await,
        Command::Monitor { port, baud } => monitor(&config, port, baud).await,
    }
}

fn list_ports(config: &Config, json: bool) -> AppResult<()> {
    let ports = SystemPortEnumerator::excluding(config.discovery.exclude_ports.clone()).describe_ports();
    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        let usb = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" {vid}:{pid}"),
            _ => String::new(),
        };
        let product = port.product.map(|p| format!(" {p}")).unwrap_or_default();
        println!("{}\t{}{}{}", port.port_name, port.transport, usb, product);
    }
    Ok(())
}

fn profile_from(config: &Config) -> PrinterProfile {
    PrinterProfile {
        port: config.profile.port.clone(),
        baud_rate: config.profile.baud,
        auto_connect: config.profile.auto_connect,
    }
}

fn start_engine(config: &Config, profile: PrinterProfile) -> (EngineHandle, tokio::sync::mpsc::UnboundedSender<DiscoveryEvent>) {
    let factory = SerialTransportFactory::system(SerialTransportSettings {
        read_timeout: config.serial.read_timeout(),
        handshake_idle_reads: config.serial.handshake_idle_reads,
    });
    let store = MemoryProfileStore::from_profile(&profile);
    let (engine, handle) = Engine::new(Arc::new(factory), Arc::new(store), EngineSettings::from(config));
    let discovery = engine.discovery_sender();
    engine.spawn();
    (handle, discovery)
}

/// Pick the target port: explicit flag (through aliases), else the profile.
fn target_port(config: &Config, port: Option<String>) -> AppResult<String> {
    port.map(|p| config.serial.resolve_port(&p))
        .or_else(|| config.profile.port.clone())
        .ok_or_else(|| AppError::InvalidArgument("no --port given and no profile port configured".into()))
}

fn parse_baud(baud: Option<u32>) -> AppResult<Option<BaudRate>> {
    baud.map(|b| BaudRate::try_from(b).map_err(|e| AppError::InvalidArgument(e.to_string())))
        .transpose()
}

/// Attach `address` without running discovery and wait for the handshake.
async fn connect_direct(
    config: &Config,
    address: &str,
    baud: Option<BaudRate>,
) -> AppResult<EngineHandle> {
    let mut profile = profile_from(config);
    profile.port = Some(address.to_string());
    profile.auto_connect = true;
    if let Some(baud) = baud {
        profile.baud_rate = baud;
    }

    let (handle, discovery) = start_engine(config, profile);
    discovery
        .send(DiscoveryEvent::Attached(address.to_string()))
        .map_err(|_| AppError::Engine(EngineError::Closed))?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let state = match handle.snapshot(address).await {
            Ok(snapshot) => match snapshot.state {
                ConnectionState::Connected => break,
                ConnectionState::Error => {
                    return Err(AppError::InvalidArgument(format!(
                        "could not connect to {address}: {}",
                        snapshot.last_error.unwrap_or_default()
                    )))
                }
                other => other,
            },
            // The attach event may not have been handled yet.
            Err(EngineError::UnknownAddress(_)) => ConnectionState::Disconnected,
            Err(e) => return Err(e.into()),
        };
        if tokio::time::Instant::now() >= deadline {
            return Err(AppError::InvalidArgument(format!(
                "{address} did not answer the handshake (last state {state:?})"
            )));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!(address, "connected");
    Ok(handle)
}

async fn print_file(
    config: &Config,
    file: PathBuf,
    port: Option<String>,
    baud: Option<u32>,
    estimate: f64,
) -> AppResult<()> {
    let address = target_port(config, port)?;
    let baud = parse_baud(baud)?;
    let text = tokio::fs::read_to_string(&file).await?;
    let lines = prepare_lines(&text);
    info!(file = %file.display(), lines = lines.len(), "loaded G-code");

    let handle = connect_direct(config, &address, baud).await?;
    // Give the firmware a moment to answer M115 before the job starts.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let job_id = handle.request_write(&address, lines, estimate).await?;
    info!(job = %job_id, "print started");

    let mut progress = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                if handle.request_shutdown(&StdinPrompt).await? {
                    warn!("print abandoned");
                    return Err(AppError::PrintFailed { address, outcome: "abandoned".into() });
                }
            }
            _ = progress.tick() => {
                let snapshot = handle.snapshot(&address).await?;
                if let Some(job) = snapshot.job.as_ref() {
                    eprintln!(
                        "{:>5.1}%  {}/{} lines  {:.0}s left  {}",
                        job.progress * 100.0,
                        job.lines_sent,
                        job.total_lines,
                        job.remaining_seconds,
                        temperature_summary(&snapshot),
                    );
                    continue;
                }
                let outcome = snapshot
                    .last_job
                    .as_ref()
                    .filter(|job| job.id == job_id)
                    .map(|job| job.state)
                    .unwrap_or(JobState::Error);
                let _ = handle.disconnect(&address).await;
                return match outcome {
                    JobState::Completed => {
                        info!("print completed");
                        Ok(())
                    }
                    other => Err(AppError::PrintFailed {
                        address,
                        outcome: format!("{other:?}").to_lowercase(),
                    }),
                };
            }
        }
    }
}

async fn monitor(config: &Config, port: Option<String>, baud: Option<u32>) -> AppResult<()> {
    let address = target_port(config, port)?;
    let handle = connect_direct(config, &address, parse_baud(baud)?).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            line = stdin.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => {
                    if let Err(e) = handle.send_command(&address, line.trim()).await {
                        eprintln!("error: {e}");
                    }
                }
                Some(_) => {}
                None => break,
            },
            _ = ticker.tick() => {
                let snapshot = handle.snapshot(&address).await?;
                eprintln!("[{}] {:?}  {}", snapshot.firmware.name, snapshot.state, temperature_summary(&snapshot));
            }
        }
    }
    handle.request_shutdown(&StdinPrompt).await?;
    Ok(())
}

async fn watch(config: &Config) -> AppResult<()> {
    let (handle, discovery_tx) = start_engine(config, profile_from(config));
    let discovery = if config.discovery.enabled {
        let enumerator = SystemPortEnumerator::excluding(config.discovery.exclude_ports.clone());
        Some(DiscoveryLoop::spawn(
            Arc::new(enumerator),
            config.discovery.interval(),
            discovery_tx,
        ))
    } else {
        // Without discovery only the configured profile port is tracked.
        let port = config.profile.port.clone().ok_or_else(|| {
            AppError::InvalidArgument("discovery is disabled and no profile port is configured".into())
        })?;
        warn!(address = %port, "port discovery disabled");
        discovery_tx
            .send(DiscoveryEvent::Attached(port))
            .map_err(|_| AppError::Engine(EngineError::Closed))?;
        None
    };

    let mut ticker = tokio::time::interval(config.discovery.interval());
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                if handle.request_shutdown(&StdinPrompt).await? {
                    break;
                }
            }
            _ = ticker.tick() => {
                let ports = handle.list_ports().await?;
                let connected = handle.output_devices().await?;
                eprintln!("ports: {}  connected: {}", ports.join(", "), connected.join(", "));
                for snapshot in handle.snapshots().await? {
                    if snapshot.state == ConnectionState::Connected {
                        eprintln!("  {} [{}] {}", snapshot.address, snapshot.firmware.name, temperature_summary(&snapshot));
                    }
                }
            }
        }
    }
    if let Some(discovery) = discovery {
        discovery.shutdown().await;
    }
    Ok(())
}

fn temperature_summary(snapshot: &SessionSnapshot) -> String {
    let mut parts: Vec<String> = snapshot
        .temperatures
        .extruders
        .iter()
        .map(|(index, t)| format!("T{index} {:.1}/{:.0}", t.current, t.target))
        .collect();
    if let Some(bed) = snapshot.temperatures.bed {
        parts.push(format!("B {:.1}/{:.0}", bed.current, bed.target));
    }
    parts.join("  ")
}
