//! Pulsewatch monitor
//!
//! Run with: cargo run -- --config pulsewatch.toml
//!
//! Environment variables:
//! - PULSEWATCH_CONFIG: Config file path (default: pulsewatch.toml)
//! - SERVER_CHAN_KEY: Push credential; the variable name can be changed with
//!   `notification.credential_env`. Unset means alerts are only logged.
//! - RUST_LOG: Log level (default: pulsewatch=info)
//!
//! Send SIGHUP to reload the target list. Ctrl+C or SIGTERM shuts down.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use pulsewatch::api::run_server;
use pulsewatch::registry::{ConfigError, MonitorConfig, Settings};
use pulsewatch::Monitor;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for configuration errors
const EXIT_CONFIG: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "pulsewatch", version, about = "Multi-target availability monitor")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "PULSEWATCH_CONFIG", default_value = "pulsewatch.toml")]
    config: PathBuf,

    /// Validate the config and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulsewatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let settings = match load_settings(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    log_settings(&cli.config, &settings);
    if cli.check {
        tracing::info!("Configuration OK");
        return ExitCode::SUCCESS;
    }

    let api_listen = settings.api_listen;
    let monitor = match Monitor::new(settings) {
        Ok(monitor) => monitor,
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Status API
    let (api_stop_tx, mut api_stop_rx) = watch::channel(false);
    let api_handle = match api_listen {
        Some(addr) => match TcpListener::bind(addr).await {
            Ok(listener) => {
                let state = monitor.app_state();
                Some(tokio::spawn(async move {
                    let stop = async move {
                        let _ = api_stop_rx.wait_for(|stop| *stop).await;
                    };
                    if let Err(e) = run_server(listener, state, stop).await {
                        tracing::error!("Status API failed: {}", e);
                    }
                }))
            }
            Err(e) => {
                tracing::error!("Failed to bind status API on {}: {}", addr, e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    monitor.start();
    run_until_interrupted(&monitor, &cli.config).await;

    monitor.shutdown().await;
    api_stop_tx.send_replace(true);
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    tracing::info!("Pulsewatch stopped");
    ExitCode::SUCCESS
}

fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    MonitorConfig::from_file(path)?.settings()
}

fn log_settings(path: &Path, settings: &Settings) {
    tracing::info!("Pulsewatch configuration ({}):", path.display());
    tracing::info!("  Targets: {}", settings.targets.len());
    for target in &settings.targets {
        tracing::info!(
            "    - {} [{}] {} every {:?} (timeout {:?}, threshold {})",
            target.name,
            target.protocol,
            target.address,
            target.interval,
            target.timeout,
            target.failure_threshold
        );
    }
    let notification = &settings.notification;
    if notification.is_enabled() {
        tracing::info!(
            "  Notifications: {:?} via {}",
            notification.provider,
            notification.endpoint
        );
    } else {
        tracing::info!("  Notifications: DISABLED (no credential)");
    }
    tracing::info!("  Dedup window: {:?}", notification.dedup_window);
    tracing::info!("  Max delivery attempts: {}", notification.max_attempts);
    tracing::info!("  Error policy: {:?}", settings.error_policy);
    if let Some(path) = &settings.state_file {
        tracing::info!("  State file: {}", path.display());
    }
    if let Some(addr) = settings.api_listen {
        tracing::info!("  Status API: {}", addr);
    }
}

/// Re-read the config and apply the new target list
async fn reload(monitor: &Monitor, path: &Path) {
    tracing::info!("Reloading configuration from {}", path.display());
    match load_settings(path) {
        Ok(settings) => {
            monitor.reload(settings.targets).await;
        }
        Err(e) => tracing::error!("Config reload failed, keeping current targets: {}", e),
    }
}

#[cfg(unix)]
async fn run_until_interrupted(monitor: &Monitor, config_path: &Path) {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    async fn recv(signal: &mut Option<Signal>) -> Option<()> {
        match signal {
            Some(signal) => signal.recv().await,
            None => std::future::pending().await,
        }
    }

    let install = |kind: SignalKind, name: &str| match signal(kind) {
        Ok(signal) => Some(signal),
        Err(e) => {
            tracing::warn!("Failed to install {} handler: {}", name, e);
            None
        }
    };
    let mut hangup = install(SignalKind::hangup(), "SIGHUP");
    let mut terminate = install(SignalKind::terminate(), "SIGTERM");

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
            Some(()) = recv(&mut terminate) => break,
            Some(()) = recv(&mut hangup) => reload(monitor, config_path).await,
        }
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(not(unix))]
async fn run_until_interrupted(_monitor: &Monitor, _config_path: &Path) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
