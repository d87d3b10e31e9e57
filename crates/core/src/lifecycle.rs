//! Lifecycle controller: startup, the running worker, and the single
//! drain/cleanup sequence that follows whichever termination trigger fires
//! first.
//!
//! State machine:
//! `Starting → Running → StopRequested → Draining → Stopped`
//!
//! Three independent triggers race while `Running`:
//! - the worker completing (normally, with a fault, or after observing
//!   cancellation),
//! - the host stop trigger (e.g. Ctrl+C forwarded by [`ConsoleHost`]),
//! - an OS close/log-off/shutdown notification via the [`SignalAdapter`].
//!
//! Each trigger tries to latch its reason in the shared [`ExitState`]; only
//! the first succeeds. Every trigger still performs its local side effects
//! (cancelling the run scope, requesting a host stop), all of which are
//! idempotent.
//!
//! [`ConsoleHost`]: crate::host::ConsoleHost

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleanup::{CleanupDone, CleanupHook, CleanupSequencer};
use crate::config::{AppConfig, LifecycleConfig, SignalRegistrationPolicy};
use crate::errors::{LifecycleError, WorkerError};
use crate::exit_state::ExitState;
use crate::host::HostLifetime;
use crate::models::{ExitReason, LifecycleState};
use crate::signals::{
    self, SignalAdapter, SignalRegistrar, SignalRegistration, TerminationHandler,
};
use crate::worker::{Completion, Worker};

// ---------------------------------------------------------------------------
// State cell
// ---------------------------------------------------------------------------

/// Atomic holder of the current [`LifecycleState`]. Only moves forward.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(LifecycleState::Starting as u8))
    }
}

impl StateCell {
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` if it is ahead of the current state. Returns whether the
    /// state changed.
    pub fn advance(&self, to: LifecycleState) -> bool {
        let result = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < to as u8).then_some(to as u8)
            });
        match result {
            Ok(from) => {
                info!(from = %LifecycleState::from_u8(from), to = %to, "lifecycle transition");
                true
            }
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Status handle
// ---------------------------------------------------------------------------

/// Cheap, cloneable view of a controller's progress.
#[derive(Clone)]
pub struct LifecycleStatus {
    exit: Arc<ExitState>,
    state: Arc<StateCell>,
    done: Arc<CleanupDone>,
}

impl LifecycleStatus {
    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit.get().cloned()
    }

    pub fn is_cleanup_done(&self) -> bool {
        self.done.is_done()
    }

    /// Wait until cleanup has finished.
    pub async fn wait_for_cleanup(&self) {
        self.done.wait().await;
    }
}

// ---------------------------------------------------------------------------
// Run handle
// ---------------------------------------------------------------------------

/// The in-flight worker execution. Owned exclusively by the controller.
struct RunHandle {
    scope: CancellationToken,
    handle: Option<JoinHandle<Result<(), WorkerError>>>,
    completion_observed: bool,
}

impl RunHandle {
    fn spawn<W: Worker>(worker: W, scope: CancellationToken) -> Self {
        let handle = tokio::spawn(worker.run(scope.clone()));
        Self {
            scope,
            handle: Some(handle),
            completion_observed: false,
        }
    }

    fn cancel(&self) {
        self.scope.cancel();
    }

    /// Await the worker. Cancel-safe: dropping the future before it resolves
    /// leaves the handle in place.
    async fn join(&mut self) -> Option<Completion> {
        let handle = self.handle.as_mut()?;
        let result = handle.await;
        self.handle = None;
        self.completion_observed = true;
        Some(Completion::from_join(result))
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// OS termination bridge
// ---------------------------------------------------------------------------

/// Connects the signal adapter to the controller's shared state.
struct SignalBridge<H: HostLifetime> {
    exit: Arc<ExitState>,
    state: Arc<StateCell>,
    done: Arc<CleanupDone>,
    host: Arc<H>,
}

impl<H: HostLifetime> TerminationHandler for SignalBridge<H> {
    fn on_termination(&self, reason: ExitReason) {
        let kind = reason.kind();
        if self.exit.try_latch(reason) {
            info!(reason = %kind, "OS notification requested shutdown");
        }
        self.state.advance(LifecycleState::StopRequested);
        self.host.request_stop();
    }

    fn is_cleanup_done(&self) -> bool {
        self.done.is_done()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Coordinates one worker run from startup to the final exit reason.
pub struct LifecycleController<H: HostLifetime> {
    host: Arc<H>,
    config: LifecycleConfig,
    exit: Arc<ExitState>,
    state: Arc<StateCell>,
    done: Arc<CleanupDone>,
    sequencer: CleanupSequencer,
    adapter: Arc<SignalAdapter>,
    os_signals: bool,
    registrar: SignalRegistrar,
}

impl<H: HostLifetime> LifecycleController<H> {
    pub fn new(host: Arc<H>, config: &AppConfig) -> Self {
        let exit = Arc::new(ExitState::new());
        let state = Arc::new(StateCell::default());
        let done = Arc::new(CleanupDone::new());

        let bridge = SignalBridge {
            exit: exit.clone(),
            state: state.clone(),
            done: done.clone(),
            host: host.clone(),
        };
        let adapter = Arc::new(SignalAdapter::new(
            Arc::new(bridge),
            config.lifecycle.signal_poll(),
        ));

        Self {
            host,
            config: config.lifecycle.clone(),
            exit,
            state,
            sequencer: CleanupSequencer::new(config.cleanup.clone(), done.clone()),
            done,
            adapter,
            os_signals: true,
            registrar: signals::register,
        }
    }

    /// Enable or disable registering the adapter with the OS. The adapter
    /// can still be driven by hand through [`signal_adapter`](Self::signal_adapter).
    pub fn with_os_signals(mut self, enabled: bool) -> Self {
        self.os_signals = enabled;
        self
    }

    /// Replace the function that installs the adapter with the OS.
    pub fn with_signal_registrar(mut self, registrar: SignalRegistrar) -> Self {
        self.registrar = registrar;
        self
    }

    /// Attach an observer to every cleanup tick.
    pub fn with_cleanup_hook(mut self, hook: CleanupHook) -> Self {
        self.sequencer = self.sequencer.with_hook(hook);
        self
    }

    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus {
            exit: self.exit.clone(),
            state: self.state.clone(),
            done: self.done.clone(),
        }
    }

    pub fn signal_adapter(&self) -> Arc<SignalAdapter> {
        self.adapter.clone()
    }

    /// Run `worker` to completion and return the latched exit reason.
    ///
    /// The only error is a failed OS signal registration under the
    /// `required` policy; everything after startup is converted into the
    /// exit reason.
    pub async fn run<W: Worker>(self, worker: W) -> Result<ExitReason, LifecycleError> {
        // Starting
        let _registration = self.register_signals()?;
        // From here on, OS callbacks parked on the done flag are released
        // even if this future is dropped or cleanup unwinds.
        let _release = self.done.mark_on_drop();

        let host_token = self.host.stopping_token();
        let scope = host_token.child_token();

        self.host.on_started(Box::new(|| info!("Application has started")));
        {
            let exit = self.exit.clone();
            let state = self.state.clone();
            let scope = scope.clone();
            self.host.on_stopping(Box::new(move || {
                info!("Application is stopping");
                exit.try_latch(ExitReason::UserCancel);
                state.advance(LifecycleState::StopRequested);
                scope.cancel();
            }));
        }

        let mut run = RunHandle::spawn(worker, scope);
        self.state.advance(LifecycleState::Running);
        self.host.notify_started();

        // Running: whichever of worker completion / host stop comes first.
        // OS notifications arrive through the bridge and surface here as a
        // host stop.
        tokio::select! {
            Some(completion) = run.join() => {
                self.record_completion(completion);
                self.state.advance(LifecycleState::StopRequested);
                self.host.request_stop();
                run.cancel();
            }
            _ = host_token.cancelled() => {
                debug!("host stop observed while worker running");
                self.state.advance(LifecycleState::StopRequested);
                run.cancel();
            }
        }

        // Draining
        let reason = self.exit.get_or_default().clone();
        self.state.advance(LifecycleState::Draining);
        self.drain(&mut run).await;
        drop(run);

        self.sequencer.run(&reason).await;
        self.state.advance(LifecycleState::Stopped);
        info!(
            reason = %reason,
            exit_code = reason.exit_code(),
            "application stopped"
        );
        Ok(reason)
    }

    fn register_signals(&self) -> Result<Option<SignalRegistration>, LifecycleError> {
        if !self.os_signals {
            debug!("OS signal registration disabled");
            return Ok(None);
        }
        match (self.registrar)(self.adapter.clone()) {
            Ok(registration) => Ok(Some(registration)),
            Err(e) => match self.config.signal_registration {
                SignalRegistrationPolicy::Required => {
                    error!(error = %e, "cannot guarantee graceful shutdown, refusing to start");
                    Err(LifecycleError::SignalRegistration(e))
                }
                SignalRegistrationPolicy::BestEffort => {
                    warn!(error = %e, "OS signal registration failed, continuing without it");
                    Ok(None)
                }
            },
        }
    }

    /// Wait for the worker to finish, bounded by the drain timeout.
    async fn drain(&self, run: &mut RunHandle) {
        if run.completion_observed {
            return;
        }
        match tokio::time::timeout(self.config.drain_timeout(), run.join()).await {
            Ok(Some(completion)) => self.record_completion(completion),
            Ok(None) => {}
            Err(_) => {
                warn!(
                    timeout_secs = self.config.drain_timeout_secs,
                    "worker did not stop within drain timeout, aborting"
                );
                run.abort();
            }
        }
    }

    /// Turn a worker completion into a latch attempt.
    fn record_completion(&self, completion: Completion) {
        match completion {
            Completion::Finished => {
                info!("worker completed");
                self.exit.try_latch(ExitReason::Normal);
            }
            Completion::Cancelled => {
                debug!("worker observed cancellation");
                self.exit.try_latch(ExitReason::UserCancel);
            }
            Completion::Faulted(fault) => {
                error!(error = %fault, "worker failed with an unhandled fault");
                self.exit.try_latch(ExitReason::Error(fault));
            }
        }
    }
}
