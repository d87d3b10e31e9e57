//! Error types for the warden core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Signal errors
// ---------------------------------------------------------------------------

/// Errors from registering the OS termination callback.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The operating system refused the handler registration.
    #[error("failed to register OS signal handler: {0}")]
    RegistrationFailed(String),

    /// Signal stream setup failed (Unix).
    #[error("signal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Lifecycle errors
// ---------------------------------------------------------------------------

/// Errors that prevent the lifecycle controller from starting.
///
/// Once the worker is running nothing is surfaced as an error: faults are
/// converted into the latched exit reason instead.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The OS termination callback could not be installed and the
    /// registration policy is `required`.
    #[error("graceful shutdown unavailable: {0}")]
    SignalRegistration(#[source] SignalError),
}

// ---------------------------------------------------------------------------
// Worker completion
// ---------------------------------------------------------------------------

/// How the worker body finished when it did not return `Ok(())`.
///
/// Cancellation is a distinct variant so it can be told apart from real
/// faults without inspecting error types.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker observed its cancellation scope and stopped.
    #[error("worker observed cancellation")]
    Cancelled,

    /// Any other unhandled fault.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl WorkerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ConfigError::InvalidValue {
            field: "cleanup.tick_ms".into(),
            detail: "must be > 0".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration value for 'cleanup.tick_ms': must be > 0"
        );

        let err = LifecycleError::SignalRegistration(SignalError::RegistrationFailed(
            "access denied".into(),
        ));
        assert!(err.to_string().contains("access denied"));

        let err = WorkerError::Fault(anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_cancelled());
        assert!(WorkerError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let cfg_err = ConfigError::FileNotFound("/tmp/missing.toml".into());
        let core_err: CoreError = cfg_err.into();
        assert!(matches!(core_err, CoreError::Config(_)));

        let sig_err = SignalError::RegistrationFailed("nope".into());
        let core_err: CoreError = sig_err.into();
        assert!(matches!(core_err, CoreError::Signal(_)));
    }
}
