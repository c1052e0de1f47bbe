//! vpnservice
//!
//! Brings up a tunnel interface from a JSON options file, reports lifecycle
//! events as JSON lines on stdout and releases the tunnel on SIGHUP
//! (revocation) or SIGINT/SIGTERM (teardown).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};

use vpnservice::config::{ConfigResolver, RawConfig, Settings, TunnelOptions};
use vpnservice::logging::{init_logging, parse_level, LogOptions};

/// Tunnel interface lifecycle service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, value_name = "FILE", default_value = "vpnservice.toml")]
    config: PathBuf,

    /// Log level, overrides the settings file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve start options and print the tunnel descriptor
    Resolve {
        /// JSON file holding the start options
        #[arg(short, long, value_name = "FILE")]
        options: Option<PathBuf>,
    },
    /// Establish the tunnel and hold it until revoked or terminated
    Run {
        /// JSON file holding the start options
        #[arg(short, long, value_name = "FILE")]
        options: Option<PathBuf>,

        /// Report lifecycle events through the log instead of stdout
        #[arg(long)]
        log_events: bool,
    },
}

fn load_raw_options(path: Option<&Path>) -> anyhow::Result<RawConfig> {
    let Some(path) = path else {
        return Ok(RawConfig::new());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read options file {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse options file {}", path.display()))?;
    Ok(TunnelOptions::from_value(&value)?.to_raw())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_or_default(&cli.config)?;
    if let Some(level) = &cli.log_level {
        if parse_level(level).is_none() {
            anyhow::bail!("unknown log level {:?}", level);
        }
        settings.logging.level = level.clone();
    }
    let _guard = init_logging(LogOptions::from_settings(&settings.logging));

    let resolver = ConfigResolver::from_settings(&settings)?;

    match cli.command {
        Command::Resolve { options } => {
            let raw = load_raw_options(options.as_deref())?;
            let descriptor = resolver.resolve(&raw)?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
            Ok(())
        }
        Command::Run {
            options,
            log_events,
        } => {
            let raw = load_raw_options(options.as_deref())?;
            run(resolver, &settings, &raw, log_events).await
        }
    }
}

#[cfg(target_os = "linux")]
async fn run(
    resolver: ConfigResolver,
    settings: &Settings,
    raw: &RawConfig,
    log_events: bool,
) -> anyhow::Result<()> {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::signal::unix::{signal, SignalKind};
    use vpnservice::event::{EventSink, TracingSink};
    use vpnservice::lifecycle::{global, LifecycleController};
    use vpnservice::tunnel::linux::LinuxTunProvider;

    let provider = Arc::new(LinuxTunProvider::from_settings(&settings.linux));
    let sink: Arc<dyn EventSink> = if log_events {
        Arc::new(TracingSink)
    } else {
        Arc::new(|event: &str, payload: Value| {
            println!("{}", json!({ "event": event, "payload": payload }));
        })
    };
    let controller = Arc::new(LifecycleController::new(resolver, provider, sink));
    if global::install(controller).is_err() {
        anyhow::bail!("tunnel service already installed");
    }

    let fd = global::on_start(raw)?;
    info!(fd, "Tunnel up, waiting for SIGHUP, SIGINT or SIGTERM");

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let result = tokio::select! {
        _ = sighup.recv() => {
            info!("Received SIGHUP, revoking tunnel");
            global::on_revoke()
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
            global::on_destroy()
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            global::on_destroy()
        }
    };

    match result {
        Ok(outcome) => {
            info!(?outcome, "Tunnel service stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Tunnel release reported an error");
            Err(e.into())
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn run(
    _resolver: ConfigResolver,
    _settings: &Settings,
    _raw: &RawConfig,
    _log_events: bool,
) -> anyhow::Result<()> {
    anyhow::bail!("no tunnel capability available on this platform")
}
