//! Signal adapter: turns OS termination notifications into exit reasons.
//!
//! The OS delivers console notifications on its own thread and may kill the
//! process as soon as that callback returns. [`SignalAdapter::handle`]
//! therefore parks the calling thread until the registered
//! [`TerminationHandler`] reports that cleanup is complete.
//!
//! Interactive interrupts (Ctrl+C, Ctrl+Break) are reported as not handled so
//! the host's own interrupt handling runs instead.
//!
//! Platform mapping:
//! - Windows: `SetConsoleCtrlHandler`; CTRL_CLOSE, CTRL_LOGOFF and
//!   CTRL_SHUTDOWN map to `Close`, `LogOff` and `Shutdown`.
//! - Unix: SIGHUP maps to `Close`, SIGTERM to `Shutdown`. Delivery happens on
//!   a dedicated blocking thread so the same parking contract holds.

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::errors::SignalError;
use crate::models::ExitReason;

// ---------------------------------------------------------------------------
// Console events
// ---------------------------------------------------------------------------

/// Abstract category of an OS termination notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleEvent {
    /// Ctrl+C or SIGINT.
    Interrupt,
    /// Ctrl+Break.
    Break,
    /// Console window closed, or SIGHUP.
    Close,
    /// User log-off (service contexts).
    LogOff,
    /// System shutdown, or SIGTERM.
    Shutdown,
}

impl ConsoleEvent {
    /// The exit reason this event requests, or `None` for interrupt-class
    /// events that are left to the host.
    pub fn exit_reason(self) -> Option<ExitReason> {
        match self {
            Self::Interrupt | Self::Break => None,
            Self::Close => Some(ExitReason::Close),
            Self::LogOff => Some(ExitReason::LogOff),
            Self::Shutdown => Some(ExitReason::Shutdown),
        }
    }
}

impl fmt::Display for ConsoleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::Break => write!(f, "break"),
            Self::Close => write!(f, "close"),
            Self::LogOff => write!(f, "log_off"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Receiver of termination requests coming from the OS.
pub trait TerminationHandler: Send + Sync + 'static {
    /// Called synchronously on the OS callback thread.
    fn on_termination(&self, reason: ExitReason);

    /// Whether cleanup for the latched reason has finished.
    fn is_cleanup_done(&self) -> bool;
}

/// Translates [`ConsoleEvent`]s into calls on a [`TerminationHandler`].
pub struct SignalAdapter {
    handler: Arc<dyn TerminationHandler>,
    poll: Duration,
}

impl SignalAdapter {
    pub fn new(handler: Arc<dyn TerminationHandler>, poll: Duration) -> Self {
        Self { handler, poll }
    }

    /// Handle one OS notification. Returns whether it was handled.
    ///
    /// For close/log-off/shutdown this does not return until the handler
    /// reports cleanup complete.
    pub fn handle(&self, event: ConsoleEvent) -> bool {
        let Some(reason) = event.exit_reason() else {
            debug!(%event, "interrupt-class notification left to the host");
            return false;
        };

        info!(%event, "OS termination notification received");
        self.handler.on_termination(reason);

        while !self.handler.is_cleanup_done() {
            std::thread::sleep(self.poll);
        }

        info!(%event, "cleanup finished, releasing OS callback");
        true
    }
}

// ---------------------------------------------------------------------------
// Process-wide registration
// ---------------------------------------------------------------------------

/// The currently installed adapter, tagged with its registration generation.
static CURRENT: Mutex<Option<(u64, Arc<SignalAdapter>)>> = Mutex::new(None);
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Route an OS notification to the current adapter.
///
/// `generation` lets a platform listener that belongs to a replaced
/// registration ignore events.
fn dispatch(event: ConsoleEvent, generation: Option<u64>) -> bool {
    let adapter = {
        let current = CURRENT.lock().unwrap_or_else(|e| e.into_inner());
        match current.as_ref() {
            Some((gen, adapter)) if generation.map_or(true, |g| g == *gen) => adapter.clone(),
            _ => return false,
        }
    };
    // Lock released: handling may block for the whole cleanup phase.
    adapter.handle(event)
}

/// The live OS signal registration.
///
/// Exactly one is active per process; registering again replaces the
/// previous adapter. Dropping the registration uninstalls it if it is still
/// the current one.
pub struct SignalRegistration {
    generation: u64,
    #[cfg(unix)]
    listener: tokio::task::JoinHandle<()>,
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.listener.abort();

        let mut current = CURRENT.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(current.as_ref(), Some((gen, _)) if *gen == self.generation) {
            *current = None;
            #[cfg(windows)]
            windows::uninstall();
            debug!(generation = self.generation, "signal adapter unregistered");
        }
    }
}

/// Installs an adapter as the OS termination callback. [`register`] is the
/// real one.
pub type SignalRegistrar = fn(Arc<SignalAdapter>) -> Result<SignalRegistration, SignalError>;

/// Install `adapter` as the process's OS termination callback.
///
/// On Unix this must be called from within a Tokio runtime.
pub fn register(adapter: Arc<SignalAdapter>) -> Result<SignalRegistration, SignalError> {
    let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;

    #[cfg(unix)]
    let listener = unix::listen(generation)?;

    #[cfg(windows)]
    windows::install()?;

    let previous = CURRENT
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .replace((generation, adapter));
    if let Some((old, _)) = previous {
        info!(old, new = generation, "replaced existing signal adapter");
    } else {
        info!(generation, "signal adapter registered");
    }

    Ok(SignalRegistration {
        generation,
        #[cfg(unix)]
        listener,
    })
}
