//! warden daemon entry point.
//!
//! Loads configuration, initializes logging, runs the heartbeat worker under
//! the lifecycle controller, and exits with the code of whichever exit reason
//! was latched first.

mod heartbeat;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use warden_core::errors::LifecycleError;
use warden_core::{AppConfig, ConsoleHost, ExitReason, LifecycleController};

use crate::heartbeat::HeartbeatWorker;

const DEFAULT_CONFIG_PATH: &str = "~/.config/warden/warden.toml";

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// warden console daemon.
#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Run a background worker with graceful, signal-driven shutdown"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Make the worker fail after this many heartbeats.
    #[arg(long, value_name = "N")]
    fail_after: Option<u64>,

    /// Make the worker finish normally after this many heartbeats.
    #[arg(long, value_name = "N")]
    run_for: Option<u64>,

    /// Print the resolved configuration and exit.
    #[arg(long)]
    dry_run: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, config_path) = load_config(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }
    if args.fail_after.is_some() {
        config.worker.fail_after_ticks = args.fail_after;
    }
    if args.run_for.is_some() {
        config.worker.run_for_ticks = args.run_for;
    }
    config
        .validate()
        .context("configuration validation failed")?;

    if args.dry_run {
        let rendered =
            toml::to_string_pretty(&config).context("failed to render configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    let guard = init_tracing(&config.daemon.log_level, config.daemon.log_dir.as_deref())?;

    // Startup banner
    info!("========================================");
    info!("  warden v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    match &config_path {
        Some(path) => info!("Config file   : {}", path.display()),
        None => info!("Config file   : <defaults>"),
    }
    info!("Heartbeat     : {}ms", config.worker.interval_ms);
    info!("Drain timeout : {}s", config.lifecycle.drain_timeout_secs);
    info!("Cleanup tick  : {}ms", config.cleanup.tick_ms);
    info!("Signals       : {:?}", config.lifecycle.signal_registration);
    info!("Log level     : {}", config.daemon.log_level);
    info!("========================================");

    let code = match run(&config).await {
        Ok(reason) => {
            info!(reason = %reason, exit_code = reason.exit_code(), "warden stopped");
            reason.exit_code()
        }
        Err(e) => {
            error!(error = %e, "warden failed to start");
            1
        }
    };

    // process::exit skips destructors; flush the file writer first.
    drop(guard);
    std::process::exit(code);
}

async fn run(config: &AppConfig) -> Result<ExitReason, LifecycleError> {
    let host = Arc::new(ConsoleHost::new());
    let interrupt = host.listen_for_interrupt();

    let controller = LifecycleController::new(host, config);
    let result = controller
        .run(HeartbeatWorker::new(&config.worker))
        .await;

    interrupt.abort();
    result
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load the configuration file. An explicit path must exist; a missing
/// default file falls back to built-in defaults.
fn load_config(explicit: Option<&str>) -> Result<(AppConfig, Option<PathBuf>)> {
    let (path, required) = match explicit {
        Some(path) => (PathBuf::from(expand_tilde(path)), true),
        None => (PathBuf::from(expand_tilde(DEFAULT_CONFIG_PATH)), false),
    };

    if !required && !path.exists() {
        return Ok((AppConfig::default(), None));
    }

    let config = AppConfig::load_from_file(&path)
        .with_context(|| format!("failed to load configuration file {}", path.display()))?;
    Ok((config, Some(path)))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).display().to_string();
        }
    }
    path.to_string()
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Console logging, plus a daily rolling file when `log_dir` is set. The
/// returned guard must outlive all logging.
fn init_tracing(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_target(true).with_thread_ids(false);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, "warden.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(Some(guard))
}
