//! The worker body: an opaque, cooperatively cancellable unit of work.

use std::any::Any;
use std::future::Future;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::errors::WorkerError;
use crate::models::Fault;

/// A long-running task managed by the lifecycle controller.
///
/// Implementations must check `scope` periodically and return promptly once
/// it is cancelled, either with `Ok(())` or [`WorkerError::Cancelled`].
pub trait Worker: Send + 'static {
    fn run(
        self,
        scope: CancellationToken,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send + 'static;
}

/// Adapter turning a closure into a [`Worker`]. See [`worker_fn`].
pub struct FnWorker<F>(F);

/// Build a [`Worker`] from a closure receiving the cancellation scope.
pub fn worker_fn<F, Fut>(f: F) -> FnWorker<F>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    FnWorker(f)
}

impl<F, Fut> Worker for FnWorker<F>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    fn run(
        self,
        scope: CancellationToken,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send + 'static {
        (self.0)(scope)
    }
}

/// How a worker run ended, as observed by the controller.
#[derive(Debug, Clone)]
pub enum Completion {
    /// Returned `Ok(())`.
    Finished,
    /// Observed cancellation, or the task was aborted.
    Cancelled,
    /// Returned a fault or panicked.
    Faulted(Fault),
}

impl Completion {
    /// Classify the joined result of a spawned worker task.
    pub fn from_join(result: Result<Result<(), WorkerError>, JoinError>) -> Self {
        match result {
            Ok(Ok(())) => Self::Finished,
            Ok(Err(WorkerError::Cancelled)) => Self::Cancelled,
            Ok(Err(WorkerError::Fault(e))) => Self::Faulted(Fault::new(e)),
            Err(e) if e.is_cancelled() => Self::Cancelled,
            Err(e) => {
                let message = panic_message(e.into_panic().as_ref());
                Self::Faulted(Fault::new(anyhow::anyhow!("worker panicked: {message}")))
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
