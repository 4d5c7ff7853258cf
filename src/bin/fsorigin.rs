//! Runs the content origin from a TOML configuration file.
//!
//! Name registration and notification delivery normally belong to the
//! surrounding framework; this binary wires in a logging stand-in so the
//! service can run (and its refresh cycle be observed) on its own.

use std::path::PathBuf;
use std::process::ExitCode;

use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fsorigin::{Config, Dispatch, SendMode, Service};

#[derive(Parser)]
#[command(name = "fsorigin", about = "Filesystem-backed HTTP content origin")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured root directory.
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Service name prefix endpoints are registered under.
    #[arg(short, long, default_value = "/fs/")]
    prefix: String,

    /// Process index used for the persisted replacement sidecar.
    #[arg(long, default_value_t = 0)]
    process_index: u32,
}

/// Logs registrations and sends instead of delivering them.
struct LogDispatch;

#[async_trait]
impl Dispatch for LogDispatch {
    async fn subscribe(&mut self, suffix: &str) {
        info!(suffix, "subscribe");
    }

    async fn unsubscribe(&mut self, suffix: &str) {
        info!(suffix, "unsubscribe");
    }

    async fn send_async(
        &mut self,
        mode: SendMode,
        name: &str,
        body: &[u8],
        _timeout_ms: u32,
        _priority: i8,
    ) {
        info!(?mode, name, bytes = body.len(), "send");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let raw = match std::fs::read_to_string(&args.config) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("cannot read {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let mut config = match Config::from_toml_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cannot parse {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(directory) = args.directory {
        config.directory = directory;
    }

    let default_filter = if config.debug {
        format!("fsorigin={}", config.debug_level)
    } else {
        "fsorigin=info".to_owned()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let service =
        match Service::init(config, args.prefix, args.process_index, Box::new(LogDispatch)).await {
            Ok(service) => service,
            Err(e) => {
                error!(error = %e, "initialization failed");
                return ExitCode::FAILURE;
            }
        };

    let worker = service.spawn();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        _ = worker => error!("service stopped unexpectedly"),
    }
    ExitCode::SUCCESS
}
