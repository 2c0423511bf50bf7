//! GT06 tracker client daemon: dials a server, logs in, sends
//! heartbeats/locations on a timer, and relays inbound commands to an
//! attached microcontroller over a serial bridge.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gt06_proto::bridge::serial::TokioSerialTransport;
use gt06_proto::bridge::Bridge;
use gt06_proto::client::{channel, ClientEngine, StopReason};
use gt06_proto::config::ClientConfig;
use gt06_proto::error::Gt06Error;
use serde::Deserialize;
use tracing::{error, info, warn};

/// Optional TOML config file layered under environment variables and CLI
/// flags (`GT06_*` takes priority, a passed CLI flag takes priority over
/// that).
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u32>,
    imei: Option<String>,
    heartbeat_seconds: Option<u32>,
    location_seconds: Option<u32>,
    reconnect_seconds: Option<u32>,
    max_reconnect_attempts: Option<i32>,
    serial_port: Option<String>,
    baud_rate: Option<u32>,
}

#[derive(Debug, Parser)]
#[command(name = "gt06-client", about = "GT06 tracker client daemon")]
struct Cli {
    /// Optional TOML file providing defaults below the env/CLI layers.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "GT06_HOST")]
    host: Option<String>,

    #[arg(long, env = "GT06_PORT")]
    port: Option<u32>,

    #[arg(long, env = "GT06_IMEI")]
    imei: Option<String>,

    #[arg(long, env = "GT06_HEARTBEAT_SECONDS")]
    heartbeat_seconds: Option<u32>,

    #[arg(long, env = "GT06_LOCATION_SECONDS")]
    location_seconds: Option<u32>,

    #[arg(long, env = "GT06_RECONNECT_SECONDS")]
    reconnect_seconds: Option<u32>,

    #[arg(long, env = "GT06_MAX_RECONNECT_ATTEMPTS")]
    max_reconnect_attempts: Option<i32>,

    /// Serial device the command bridge writes to (e.g. /dev/ttyUSB0). If
    /// omitted, inbound commands are only logged, never forwarded.
    #[arg(long, env = "GT06_SERIAL_PORT")]
    serial_port: Option<String>,

    #[arg(long, env = "GT06_BAUD_RATE", default_value_t = 9600)]
    baud_rate: u32,
}

fn load_file_config(path: &Option<PathBuf>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
        }
        None => Ok(FileConfig::default()),
    }
}

fn build_config(cli: &Cli, file: &FileConfig) -> Result<ClientConfig, Gt06Error> {
    let host = cli.host.clone().or_else(|| file.host.clone()).unwrap_or_else(|| "127.0.0.1".to_string());
    let port = cli.port.or(file.port).unwrap_or(5023);
    let imei = cli.imei.clone().or_else(|| file.imei.clone()).unwrap_or_default();
    let heartbeat_seconds = cli.heartbeat_seconds.or(file.heartbeat_seconds).unwrap_or(30);
    let location_seconds = cli.location_seconds.or(file.location_seconds).unwrap_or(60);
    let reconnect_seconds = cli.reconnect_seconds.or(file.reconnect_seconds).unwrap_or(10);
    let max_reconnect_attempts = cli.max_reconnect_attempts.or(file.max_reconnect_attempts).unwrap_or(-1);

    ClientConfig::new(host, port, &imei, heartbeat_seconds, location_seconds, reconnect_seconds, max_reconnect_attempts)
        .map_err(Gt06Error::Config)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let file = match load_file_config(&cli.config) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "gt06_client_config_file_error");
            return std::process::ExitCode::from(2);
        }
    };
    let serial_port = cli.serial_port.clone().or_else(|| file.serial_port.clone());
    let baud_rate = if cli.baud_rate != 9600 { cli.baud_rate } else { file.baud_rate.unwrap_or(cli.baud_rate) };

    let config = match build_config(&cli, &file) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "gt06_client_invalid_configuration");
            return std::process::ExitCode::from(2);
        }
    };

    info!(host = %config.host, port = config.port, imei = %config.imei, "gt06_client_starting");

    let (handle, mut inbound) = channel();
    let mut engine = ClientEngine::new(config);

    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    engine.set_command_sink(cmd_tx);

    match serial_port {
        Some(path) => {
            tokio::spawn(async move {
                let mut transport = TokioSerialTransport::new(path.clone(), baud_rate);
                if let Err(e) = transport.open() {
                    warn!(path = %path, error = %e, "gt06_client_serial_open_failed");
                }
                let mut bridge = Bridge::new(transport);
                bridge.run(cmd_rx).await;
            });
        }
        None => {
            warn!("gt06_client_no_serial_port_configured: inbound commands will only be logged");
            tokio::spawn(async move {
                let mut rx = cmd_rx;
                while let Some(cmd) = rx.recv().await {
                    info!(text = %cmd.payload, "gt06_client_command_logged_only");
                }
            });
        }
    }

    let stop_reason = tokio::select! {
        reason = engine.run(&mut inbound) => reason,
        _ = tokio::signal::ctrl_c() => {
            info!("gt06_client_ctrl_c_received");
            handle.disconnect();
            StopReason::Disconnected
        }
    };

    info!("gt06_client_stopped");
    match stop_reason {
        StopReason::Disconnected => std::process::ExitCode::SUCCESS,
        StopReason::ReconnectAttemptsExhausted => {
            error!("gt06_client_reconnect_attempts_exhausted");
            std::process::ExitCode::from(4)
        }
    }
}
