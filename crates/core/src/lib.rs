//! warden core library.
//!
//! This crate provides the shutdown coordination machinery for a
//! console-hosted background worker: the first-writer-wins exit state, the
//! OS signal adapter, the lifecycle controller state machine, the bounded
//! cleanup sequencer, and the host and worker abstractions they plug into.

pub mod cleanup;
pub mod config;
pub mod errors;
pub mod exit_state;
pub mod host;
pub mod lifecycle;
pub mod models;
pub mod signals;
pub mod worker;

// Re-exports for convenience.
pub use config::AppConfig;
pub use exit_state::ExitState;
pub use host::{ConsoleHost, HostLifetime};
pub use lifecycle::{LifecycleController, LifecycleStatus};
pub use models::{ExitKind, ExitReason, Fault, LifecycleState};
pub use worker::{worker_fn, Worker};

/// Re-exported so workers can name the scope type without a direct
/// `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
