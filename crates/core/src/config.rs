//! TOML-based configuration for warden.
//!
//! Every section is optional; an empty file yields the built-in defaults.
//! Durations are stored as plain integers and exposed as [`Duration`]
//! through accessor methods.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::models::ExitKind;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Process-level settings (logging).
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Shutdown coordination settings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Cleanup budgets per exit reason.
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Opaque settings handed to the worker body.
    #[serde(default)]
    pub worker: WorkerConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Process-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for a daily rolling log file. Console only when unset.
    #[serde(default)]
    pub log_dir: Option<std::path::PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// What to do when the OS termination callback cannot be installed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalRegistrationPolicy {
    /// Refuse to start: graceful shutdown cannot be guaranteed.
    #[default]
    Required,
    /// Log a warning and keep running without OS notifications.
    BestEffort,
}

/// Shutdown coordination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How often a blocked OS signal callback re-checks the cleanup flag.
    #[serde(default = "default_signal_poll_ms")]
    pub signal_poll_ms: u64,

    /// Upper bound on waiting for the worker to finish while draining.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Policy applied when signal registration fails.
    #[serde(default)]
    pub signal_registration: SignalRegistrationPolicy,
}

fn default_signal_poll_ms() -> u64 {
    1000
}
fn default_drain_timeout() -> u64 {
    10
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            signal_poll_ms: default_signal_poll_ms(),
            drain_timeout_secs: default_drain_timeout(),
            signal_registration: SignalRegistrationPolicy::default(),
        }
    }
}

impl LifecycleConfig {
    pub fn signal_poll(&self) -> Duration {
        Duration::from_millis(self.signal_poll_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// Cleanup budgets.
///
/// `Normal`, `UserCancel` and `Error` share `budget_secs`. The OS-driven
/// reasons are bounded by the grace period the OS grants minus
/// `grace_margin_ms`, so the cleanup flag is always set before a forced kill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Length of one cleanup tick.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Budget for Normal / UserCancel / Error cleanup.
    #[serde(default = "default_budget")]
    pub budget_secs: u64,

    /// OS grace period after a console close.
    #[serde(default = "default_close_grace")]
    pub close_grace_secs: u64,

    /// OS grace period after a log-off.
    #[serde(default = "default_logoff_grace")]
    pub logoff_grace_secs: u64,

    /// OS grace period after a system shutdown notification.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Slack kept between the end of cleanup and the OS deadline.
    #[serde(default = "default_grace_margin")]
    pub grace_margin_ms: u64,
}

fn default_tick_ms() -> u64 {
    1000
}
fn default_budget() -> u64 {
    10
}
fn default_close_grace() -> u64 {
    5
}
fn default_logoff_grace() -> u64 {
    5
}
fn default_shutdown_grace() -> u64 {
    20
}
fn default_grace_margin() -> u64 {
    1000
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            budget_secs: default_budget(),
            close_grace_secs: default_close_grace(),
            logoff_grace_secs: default_logoff_grace(),
            shutdown_grace_secs: default_shutdown_grace(),
            grace_margin_ms: default_grace_margin(),
        }
    }
}

impl CleanupConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Total time cleanup may take for the given exit reason.
    pub fn budget_for(&self, kind: ExitKind) -> Duration {
        let margin = Duration::from_millis(self.grace_margin_ms);
        let grace = |secs: u64| Duration::from_secs(secs).saturating_sub(margin);
        match kind {
            ExitKind::Normal | ExitKind::UserCancel | ExitKind::Error => {
                Duration::from_secs(self.budget_secs)
            }
            ExitKind::Close => grace(self.close_grace_secs),
            ExitKind::LogOff => grace(self.logoff_grace_secs),
            ExitKind::Shutdown => grace(self.shutdown_grace_secs),
        }
    }

    /// Number of whole ticks that fit in the budget for `kind`.
    pub fn ticks_for(&self, kind: ExitKind) -> u32 {
        let tick = self.tick_ms.max(1) as u128;
        let ticks = self.budget_for(kind).as_millis() / tick;
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Settings consumed by the worker body only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Heartbeat period.
    #[serde(default = "default_worker_interval")]
    pub interval_ms: u64,

    /// Raise a fault after this many heartbeats.
    #[serde(default)]
    pub fail_after_ticks: Option<u64>,

    /// Return normally after this many heartbeats.
    #[serde(default)]
    pub run_for_ticks: Option<u64>,
}

fn default_worker_interval() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_worker_interval(),
            fail_after_ticks: None,
            run_for_ticks: None,
        }
    }
}

impl WorkerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all values are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.daemon.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "daemon.log_level".into(),
                detail: format!("expected one of {}", LOG_LEVELS.join(", ")),
            });
        }
        if self.lifecycle.signal_poll_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lifecycle.signal_poll_ms".into(),
                detail: "poll interval must be > 0".into(),
            });
        }
        if self.lifecycle.drain_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lifecycle.drain_timeout_secs".into(),
                detail: "drain timeout must be > 0".into(),
            });
        }
        if self.cleanup.tick_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cleanup.tick_ms".into(),
                detail: "tick length must be > 0".into(),
            });
        }
        if self.worker.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker.interval_ms".into(),
                detail: "heartbeat interval must be > 0".into(),
            });
        }

        let margin = Duration::from_millis(self.cleanup.grace_margin_ms);
        for (field, secs) in [
            ("cleanup.close_grace_secs", self.cleanup.close_grace_secs),
            ("cleanup.logoff_grace_secs", self.cleanup.logoff_grace_secs),
            ("cleanup.shutdown_grace_secs", self.cleanup.shutdown_grace_secs),
        ] {
            if Duration::from_secs(secs) <= margin {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "grace period must exceed cleanup.grace_margin_ms".into(),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
