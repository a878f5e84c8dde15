//! # CellScan
//!
//! Field collector daemon. Scans cell sites continuously, tags them with the
//! current GNSS fix, and uploads them when the control button is pressed.
//!
//! ```text
//! INFO cellscan: CellScan v0.2.0 starting...
//! INFO cellscan::coordinator: Starting network scanner
//! INFO worker{worker="scanner"}: cellscan::radio::scanner: Connected to modem LE910C1-NF
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use cellscan::bearer::command::SystemCommandRunner;
use cellscan::config::{Config, LoggingConfig};
use cellscan::coordinator::{Coordinator, SystemWorkers, WorkerHandle};
use cellscan::gnss::gnss_worker;
use cellscan::panel::{button_worker, led_worker, LedIndicator};
use cellscan::store::{RecordStore, SqliteStore};

/// Bound on stopping the GNSS and panel tasks at exit
const AUX_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "cellscan", version, about = "Cell site survey collector")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Console logging, plus a daily rolling file when a log directory is set
///
/// The returned guard must live as long as logging is wanted; dropping it
/// flushes the file writer.
fn init_logging(level: &str, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = if logging.log_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&logging.log_dir, &logging.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let _log_guard = init_logging(&cli.log_level, &config.logging);

    info!("CellScan v{} starting...", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteStore::open(&config.store.path)
            .await
            .with_context(|| format!("opening record store {}", config.store.path))?,
    );

    let (indicator, led_modes) = LedIndicator::new();
    let workers = SystemWorkers::new(&config, store.clone(), Arc::new(SystemCommandRunner));
    let coordinator = Coordinator::new(workers, store, Arc::new(indicator), config.coordinator.clone());

    let mut aux = Vec::new();

    let events = coordinator.sender();
    let modem = config.modem.clone();
    aux.push(WorkerHandle::spawn("gnss", move |cancel| gnss_worker(modem, events, cancel)));

    if config.panel.enabled {
        let led_path = PathBuf::from(&config.panel.led_path);
        let blink = config.panel.blink_interval();
        aux.push(WorkerHandle::spawn("led", move |cancel| {
            led_worker(led_path, led_modes, blink, cancel)
        }));

        let events = coordinator.sender();
        let panel = config.panel.clone();
        aux.push(WorkerHandle::spawn("button", move |cancel| button_worker(panel, events, cancel)));
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
        on_signal.cancel();
    });

    info!("Press Ctrl+C to exit");
    coordinator.run(shutdown).await;

    for handle in aux {
        handle.stop(AUX_JOIN_TIMEOUT).await;
    }

    info!("CellScan stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["cellscan"]);
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["cellscan", "-c", "/etc/cellscan.toml", "--log-level", "cellscan=debug"]);
        assert_eq!(cli.config, PathBuf::from("/etc/cellscan.toml"));
        assert_eq!(cli.log_level, "cellscan=debug");
    }
}
