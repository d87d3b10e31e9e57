//! First-writer-wins holder of the process exit reason.

use std::sync::OnceLock;

use tracing::{debug, info};

use crate::models::ExitReason;

/// Process-wide exit reason, shared by handle between every termination
/// path.
///
/// The first successful [`try_latch`](Self::try_latch) wins; every later
/// attempt is discarded. Reads never block.
#[derive(Debug, Default)]
pub struct ExitState {
    reason: OnceLock<ExitReason>,
}

impl ExitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically set the reason if none is latched yet.
    ///
    /// Returns `true` if this call won.
    pub fn try_latch(&self, reason: ExitReason) -> bool {
        let kind = reason.kind();
        match self.reason.set(reason) {
            Ok(()) => {
                info!(reason = %kind, "exit reason latched");
                true
            }
            Err(_) => {
                debug!(
                    attempted = %kind,
                    latched = %self.kind_label(),
                    "exit reason already latched, ignoring"
                );
                false
            }
        }
    }

    /// The latched reason, if any.
    pub fn get(&self) -> Option<&ExitReason> {
        self.reason.get()
    }

    pub fn is_latched(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Return the latched reason, latching `UserCancel` first if nothing was
    /// ever recorded (a plain interrupt that raced past every other path).
    pub fn get_or_default(&self) -> &ExitReason {
        self.reason.get_or_init(|| {
            info!(reason = "user_cancel", "no exit reason recorded, defaulting");
            ExitReason::UserCancel
        })
    }

    fn kind_label(&self) -> String {
        self.reason
            .get()
            .map(|r| r.kind().to_string())
            .unwrap_or_else(|| "none".into())
    }
}
