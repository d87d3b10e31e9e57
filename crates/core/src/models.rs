//! Domain model types shared by every lifecycle component.
//!
//! These types bridge the signal adapter, exit state, lifecycle controller,
//! and cleanup sequencer.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Exit reason
// ---------------------------------------------------------------------------

/// The single cause for process termination.
///
/// Exactly one reason is latched per process run (see
/// [`ExitState`](crate::exit_state::ExitState)); `Error` carries the captured
/// worker fault so it can be logged during cleanup.
#[derive(Debug, Clone)]
pub enum ExitReason {
    /// The worker returned on its own.
    Normal,
    /// The worker raised an unhandled fault.
    Error(Fault),
    /// Interactive interrupt or a host-initiated stop.
    UserCancel,
    /// The console window was closed (SIGHUP on Unix).
    Close,
    /// The user is logging off.
    LogOff,
    /// The system is shutting down (SIGTERM on Unix).
    Shutdown,
}

impl ExitReason {
    /// Numeric process exit code.
    ///
    /// Every non-fault termination uses a negative code so it can never be
    /// mistaken for a conventional failure status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Normal => 0,
            Self::Error(_) => 1,
            Self::UserCancel => -1,
            Self::Close => -2,
            Self::LogOff => -5,
            Self::Shutdown => -6,
        }
    }

    pub fn kind(&self) -> ExitKind {
        match self {
            Self::Normal => ExitKind::Normal,
            Self::Error(_) => ExitKind::Error,
            Self::UserCancel => ExitKind::UserCancel,
            Self::Close => ExitKind::Close,
            Self::LogOff => ExitKind::LogOff,
            Self::Shutdown => ExitKind::Shutdown,
        }
    }

    /// The captured fault, if this is an `Error` reason.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Error(fault) => Some(fault),
            _ => None,
        }
    }

    /// Whether this reason originated from an OS console notification.
    pub fn is_os_notification(&self) -> bool {
        matches!(self, Self::Close | Self::LogOff | Self::Shutdown)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind().fmt(f)
    }
}

/// Fieldless discriminant of [`ExitReason`], handy for comparisons and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    Normal,
    Error,
    UserCancel,
    Close,
    LogOff,
    Shutdown,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Error => write!(f, "error"),
            Self::UserCancel => write!(f, "user_cancel"),
            Self::Close => write!(f, "close"),
            Self::LogOff => write!(f, "log_off"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// A worker fault captured for logging.
///
/// Shared behind an `Arc` so the latched [`ExitReason`] stays cheaply
/// cloneable.
#[derive(Debug, Clone)]
pub struct Fault(Arc<anyhow::Error>);

impl Fault {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for Fault {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Alternate formatting prints the whole context chain.
        write!(f, "{:#}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// Phase of the lifecycle state machine.
///
/// `Starting → Running → StopRequested → Draining → Stopped`; transitions are
/// monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LifecycleState {
    Starting = 0,
    Running = 1,
    StopRequested = 2,
    Draining = 3,
    Stopped = 4,
}

impl LifecycleState {
    /// Decode the raw representation stored in an atomic cell.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::StopRequested,
            3 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop_requested"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
