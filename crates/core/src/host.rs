//! Host collaborator: the stop token plus "started"/"stopping" notification
//! points the lifecycle controller hooks into.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A one-shot callback registered on a host notification point.
pub type HostCallback = Box<dyn FnOnce() + Send>;

/// What the lifecycle controller needs from its host.
pub trait HostLifetime: Send + Sync + 'static {
    /// Token cancelled once the host has been asked to stop.
    fn stopping_token(&self) -> CancellationToken;

    /// Run `callback` when the application reports it has started.
    fn on_started(&self, callback: HostCallback);

    /// Run `callback` when a stop is first requested.
    fn on_stopping(&self, callback: HostCallback);

    /// Fire the "started" notification point.
    fn notify_started(&self);

    /// Ask the host to stop. Idempotent and callable from any thread.
    fn request_stop(&self);
}

/// Callbacks for one notification point. Callbacks registered after the
/// point fired run immediately.
#[derive(Default)]
struct NotificationPoint {
    fired: bool,
    pending: Vec<HostCallback>,
}

impl NotificationPoint {
    fn register(point: &Mutex<Self>, callback: HostCallback) {
        let mut guard = point.lock().unwrap_or_else(|e| e.into_inner());
        if guard.fired {
            drop(guard);
            callback();
        } else {
            guard.pending.push(callback);
        }
    }

    /// Returns `false` if the point had already fired.
    fn fire(point: &Mutex<Self>) -> bool {
        let pending = {
            let mut guard = point.lock().unwrap_or_else(|e| e.into_inner());
            if guard.fired {
                return false;
            }
            guard.fired = true;
            std::mem::take(&mut guard.pending)
        };
        // Run outside the lock so callbacks may register further callbacks.
        for callback in pending {
            callback();
        }
        true
    }
}

/// Host for a console process.
///
/// Forwards Ctrl+C to [`request_stop`](HostLifetime::request_stop) when
/// [`listen_for_interrupt`](Self::listen_for_interrupt) is running.
pub struct ConsoleHost {
    token: CancellationToken,
    started: Mutex<NotificationPoint>,
    stopping: Mutex<NotificationPoint>,
    stop_requested: AtomicBool,
}

impl Default for ConsoleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            started: Mutex::new(NotificationPoint::default()),
            stopping: Mutex::new(NotificationPoint::default()),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Spawn the host's interactive-interrupt listener.
    pub fn listen_for_interrupt(self: &Arc<Self>) -> JoinHandle<()> {
        let host = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => {
                        info!("received SIGINT (Ctrl+C)");
                        host.request_stop();
                    }
                    Err(e) => warn!(error = %e, "failed to listen for Ctrl+C"),
                },
                _ = host.token.cancelled() => {}
            }
        })
    }
}

impl HostLifetime for ConsoleHost {
    fn stopping_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn on_started(&self, callback: HostCallback) {
        NotificationPoint::register(&self.started, callback);
    }

    fn on_stopping(&self, callback: HostCallback) {
        NotificationPoint::register(&self.stopping, callback);
    }

    fn notify_started(&self) {
        NotificationPoint::fire(&self.started);
    }

    fn request_stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            // Make sure the token is cancelled even if the first caller is
            // still running callbacks.
            self.token.cancel();
            return;
        }
        info!("host stop requested");
        NotificationPoint::fire(&self.stopping);
        self.token.cancel();
    }
}
