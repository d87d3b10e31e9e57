//! Bounded, reason-specific cleanup run once the exit reason is latched.
//!
//! The sequencer works in fixed-length ticks. The number of ticks comes from
//! [`CleanupConfig::ticks_for`], which caps the OS-driven reasons below the
//! grace period the OS grants before a forced kill. When the last tick
//! finishes the [`CleanupDone`] flag is raised, releasing any OS callback
//! thread parked in the signal adapter.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::config::CleanupConfig;
use crate::models::ExitReason;
use crate::worker::panic_message;

// ---------------------------------------------------------------------------
// Completion flag
// ---------------------------------------------------------------------------

/// One-shot flag raised when cleanup for the latched exit reason finishes.
///
/// Synchronous waiters (the OS signal callback) poll it; async waiters are
/// woken through a [`Notify`].
#[derive(Debug, Default)]
pub struct CleanupDone {
    done: AtomicBool,
    notify: Notify,
}

impl CleanupDone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Raise the flag. Returns `false` if it was already raised.
    pub(crate) fn mark(&self) -> bool {
        let first = !self.done.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Block the current thread until the flag is raised, re-checking every
    /// `poll` interval.
    pub fn wait_blocking(&self, poll: Duration) {
        while !self.is_done() {
            std::thread::sleep(poll);
        }
    }

    /// Guard that raises the flag when dropped, however the holder exits.
    pub(crate) fn mark_on_drop(&self) -> MarkOnDrop<'_> {
        MarkOnDrop(self)
    }

    /// Wait asynchronously until the flag is raised.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        loop {
            // Register interest before checking to avoid a lost wake-up.
            notified.as_mut().enable();
            if self.is_done() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }
}

/// See [`CleanupDone::mark_on_drop`].
pub(crate) struct MarkOnDrop<'a>(&'a CleanupDone);

impl Drop for MarkOnDrop<'_> {
    fn drop(&mut self) {
        if self.0.mark() && std::thread::panicking() {
            warn!("cleanup interrupted by a panic, releasing waiters");
        }
    }
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Observer invoked after every completed cleanup tick with
/// `(reason, tick, total_ticks)`.
pub type CleanupHook = Arc<dyn Fn(&ExitReason, u32, u32) + Send + Sync>;

/// Runs the cleanup routine for a latched exit reason exactly once.
pub struct CleanupSequencer {
    config: CleanupConfig,
    done: Arc<CleanupDone>,
    started: AtomicBool,
    hook: Option<CleanupHook>,
}

impl CleanupSequencer {
    pub fn new(config: CleanupConfig, done: Arc<CleanupDone>) -> Self {
        Self {
            config,
            done,
            started: AtomicBool::new(false),
            hook: None,
        }
    }

    /// Attach an observer called after each tick.
    pub fn with_hook(mut self, hook: CleanupHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Execute cleanup for `reason`, then raise the completion flag.
    ///
    /// Returns `false` without doing anything if cleanup already ran.
    pub async fn run(&self, reason: &ExitReason) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!(reason = %reason, "cleanup already started, ignoring second request");
            return false;
        }

        // Waiters are released even if this future is dropped mid-cleanup.
        let _release = self.done.mark_on_drop();

        let kind = reason.kind();
        let total = self.config.ticks_for(kind);
        let tick = self.config.tick();

        match reason {
            ExitReason::Normal => info!(ticks = total, "cleaning up after normal completion"),
            ExitReason::UserCancel => info!(ticks = total, "cleaning up after user cancellation"),
            ExitReason::Error(fault) => {
                error!(error = %fault, ticks = total, "cleaning up after worker fault")
            }
            ExitReason::Close => info!(ticks = total, "cleaning up after console close"),
            ExitReason::LogOff => info!(ticks = total, "cleaning up before log-off"),
            ExitReason::Shutdown => info!(ticks = total, "cleaning up before system shutdown"),
        }

        for n in 1..=total {
            tokio::time::sleep(tick).await;
            info!(reason = %kind, tick = n, total, "cleanup tick");
            if let Some(hook) = &self.hook {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(reason, n, total)));
                if let Err(payload) = outcome {
                    error!(
                        reason = %kind,
                        tick = n,
                        error = %panic_message(payload.as_ref()),
                        "cleanup hook panicked, continuing"
                    );
                }
            }
        }

        info!(reason = %kind, "cleanup complete");
        true
    }
}
