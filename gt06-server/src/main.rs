//! GT06 tracker server daemon: binds a TCP port, accepts inbound tracker
//! connections, ACKs them per-protocol, and logs decoded packets.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gt06_proto::config::ServerConfig;
use gt06_proto::error::Gt06Error;
use gt06_proto::server::{serve, ServerEvent};
use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_addr: Option<String>,
    port: Option<u32>,
}

#[derive(Debug, Parser)]
#[command(name = "gt06-server", about = "GT06 tracker server daemon")]
struct Cli {
    /// Optional TOML file providing defaults below the env/CLI layers.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "GT06_BIND_ADDR")]
    bind_addr: Option<String>,

    #[arg(long, env = "GT06_PORT")]
    port: Option<u32>,
}

fn load_file_config(path: &Option<PathBuf>) -> anyhow::Result<FileConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
        }
        None => Ok(FileConfig::default()),
    }
}

fn build_config(cli: &Cli, file: &FileConfig) -> Result<ServerConfig, Gt06Error> {
    let bind_addr = cli.bind_addr.clone().or_else(|| file.bind_addr.clone()).unwrap_or_else(|| "0.0.0.0".to_string());
    let port = cli.port.or(file.port).unwrap_or(5023);
    ServerConfig::new(bind_addr, port).map_err(Gt06Error::Config)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::Login { peer, imei } => info!(peer = %peer, imei = %imei, "gt06_server_login"),
        ServerEvent::Position { peer, pos } => {
            info!(peer = %peer, lat = pos.lat_deg, lon = pos.lon_deg, "gt06_server_position")
        }
        ServerEvent::Alarm { peer, pos, alarm_type } => {
            warn!(peer = %peer, lat = pos.lat_deg, lon = pos.lon_deg, alarm_type, "gt06_server_alarm")
        }
        ServerEvent::Command { peer, text } => info!(peer = %peer, text = %text, "gt06_server_command"),
        ServerEvent::Warning { peer, msg } => warn!(peer = %peer, msg = %msg, "gt06_server_warning"),
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let file = match load_file_config(&cli.config) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "gt06_server_config_file_error");
            return std::process::ExitCode::from(2);
        }
    };
    let config = match build_config(&cli, &file) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "gt06_server_invalid_configuration");
            return std::process::ExitCode::from(2);
        }
    };

    info!(bind_addr = %config.bind_addr, port = config.port, "gt06_server_starting");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let logger = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            log_event(&event);
        }
    });

    tokio::select! {
        result = serve(config, tx) => {
            if let Err(e) = result {
                error!(error = %e, "gt06_server_fatal_io_error");
                logger.abort();
                return std::process::ExitCode::from(4);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("gt06_server_ctrl_c_received");
        }
    }

    logger.abort();
    info!("gt06_server_stopped");
    std::process::ExitCode::SUCCESS
}
