//! Heartbeat worker: logs a timestamped line on a fixed interval until its
//! scope is cancelled.
//!
//! `fail_after_ticks` and `run_for_ticks` let the daemon exercise the fault
//! and normal-completion exit paths.

use std::future::Future;
use std::time::Duration;

use chrono::Local;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

use warden_core::config::WorkerConfig;
use warden_core::errors::WorkerError;
use warden_core::{CancellationToken, Worker};

pub struct HeartbeatWorker {
    interval: Duration,
    fail_after: Option<u64>,
    run_for: Option<u64>,
}

impl HeartbeatWorker {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            interval: config.interval(),
            fail_after: config.fail_after_ticks,
            run_for: config.run_for_ticks,
        }
    }

    async fn beat(self, scope: CancellationToken) -> Result<(), WorkerError> {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "heartbeat worker started"
        );

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut beats: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = scope.cancelled() => {
                    info!(beats, "heartbeat worker observed cancellation");
                    return Err(WorkerError::Cancelled);
                }
                _ = interval.tick() => {
                    beats += 1;
                    info!(
                        beat = beats,
                        at = %Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                        "worker running"
                    );

                    if self.fail_after.is_some_and(|n| beats >= n) {
                        return Err(anyhow::anyhow!(
                            "simulated failure after {beats} heartbeats"
                        )
                        .into());
                    }
                    if self.run_for.is_some_and(|n| beats >= n) {
                        info!(beats, "heartbeat worker finished");
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl Worker for HeartbeatWorker {
    fn run(
        self,
        scope: CancellationToken,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send + 'static {
        self.beat(scope)
    }
}
