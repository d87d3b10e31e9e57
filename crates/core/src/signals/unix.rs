//! Unix delivery: SIGHUP and SIGTERM, handed to a blocking thread.

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{dispatch, ConsoleEvent};
use crate::errors::SignalError;

/// Start listening for termination signals on behalf of registration
/// `generation`.
///
/// SIGINT is deliberately not captured here; it belongs to the host.
pub(super) fn listen(generation: u64) -> Result<JoinHandle<()>, SignalError> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(()) = hangup.recv() => {
                    info!("received SIGHUP");
                    ConsoleEvent::Close
                }
                Some(()) = terminate.recv() => {
                    info!("received SIGTERM");
                    ConsoleEvent::Shutdown
                }
                else => break,
            };

            // The adapter parks the thread until cleanup is done, so it must
            // not run on a runtime worker.
            match tokio::task::spawn_blocking(move || dispatch(event, Some(generation))).await {
                Ok(true) => {}
                Ok(false) => warn!(%event, "signal was not handled by any adapter"),
                Err(e) => warn!(%event, error = %e, "signal dispatch thread failed"),
            }
        }
    }))
}
