//! End-to-end tests for the shutdown coordination state machine.
//!
//! Each test drives a real [`LifecycleController`] with a [`ConsoleHost`].
//! OS notifications are simulated by calling the controller's signal adapter
//! from a plain thread, the way the OS would call the console handler.
//! Cleanup ticks are shortened to milliseconds.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use warden_core::config::SignalRegistrationPolicy;
use warden_core::errors::{LifecycleError, SignalError, WorkerError};
use warden_core::signals::{ConsoleEvent, SignalAdapter, SignalRegistration};
use warden_core::{
    worker_fn, AppConfig, CancellationToken, ConsoleHost, ExitKind, HostLifetime, LifecycleController,
    LifecycleState, LifecycleStatus, Worker,
};

// ===========================================================================
// Helpers
// ===========================================================================

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.lifecycle.signal_poll_ms = 2;
    config.lifecycle.drain_timeout_secs = 2;
    config.cleanup.tick_ms = 2;
    config.cleanup.budget_secs = 0;
    config.cleanup.close_grace_secs = 1;
    config.cleanup.logoff_grace_secs = 1;
    config.cleanup.shutdown_grace_secs = 1;
    // 20ms of cleanup (10 ticks) for the OS-driven reasons.
    config.cleanup.grace_margin_ms = 980;
    config
}

fn controller(host: &Arc<ConsoleHost>, config: &AppConfig) -> LifecycleController<ConsoleHost> {
    LifecycleController::new(host.clone(), config).with_os_signals(false)
}

/// Worker that heartbeats until its scope is cancelled.
fn looping_worker(saw_cancel: Arc<AtomicBool>) -> impl Worker {
    worker_fn(move |scope: CancellationToken| async move {
        loop {
            tokio::select! {
                _ = scope.cancelled() => {
                    saw_cancel.store(true, Ordering::SeqCst);
                    return Err(WorkerError::Cancelled);
                }
                _ = tokio::time::sleep(Duration::from_millis(5)) => {}
            }
        }
    })
}

fn refuse_registration(_adapter: Arc<SignalAdapter>) -> Result<SignalRegistration, SignalError> {
    Err(SignalError::RegistrationFailed("access denied".into()))
}

async fn wait_for_state(status: &LifecycleStatus, state: LifecycleState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while status.state() < state {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("controller never reached the expected state");
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn test_normal_completion() {
    let mut config = fast_config();
    config.cleanup.tick_ms = 100;
    config.cleanup.budget_secs = 1;

    let host = Arc::new(ConsoleHost::new());
    let ticks = Arc::new(AtomicU32::new(0));
    let seen = ticks.clone();
    let controller = controller(&host, &config).with_cleanup_hook(Arc::new(
        move |reason: &warden_core::ExitReason, n, _total| {
            assert_eq!(reason.kind(), ExitKind::Normal);
            seen.store(n, Ordering::SeqCst);
        },
    ));
    let status = controller.status();

    let reason = controller
        .run(worker_fn(|_scope| async { Ok(()) }))
        .await
        .unwrap();

    assert_eq!(reason.kind(), ExitKind::Normal);
    assert_eq!(reason.exit_code(), 0);
    assert_eq!(ticks.load(Ordering::SeqCst), 10);
    assert!(status.is_cleanup_done());
    assert_eq!(status.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_worker_fault_latches_error() {
    let host = Arc::new(ConsoleHost::new());
    let controller = controller(&host, &fast_config());
    let status = controller.status();

    let reason = controller
        .run(worker_fn(|_scope| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(WorkerError::Fault(anyhow::anyhow!("boom")))
        }))
        .await
        .unwrap();

    assert_eq!(reason.kind(), ExitKind::Error);
    assert_eq!(reason.exit_code(), 1);
    assert!(reason.fault().unwrap().to_string().contains("boom"));
    // A worker fault asks the host to stop.
    assert!(host.is_stop_requested());
    assert!(status.is_cleanup_done());
}

#[tokio::test]
async fn test_worker_panic_latches_error() {
    let host = Arc::new(ConsoleHost::new());
    let reason = controller(&host, &fast_config())
        .run(worker_fn(|_scope| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if true {
                panic!("worker blew up");
            }
            Ok(())
        }))
        .await
        .unwrap();

    assert_eq!(reason.kind(), ExitKind::Error);
    assert!(reason.fault().unwrap().to_string().contains("worker blew up"));
}

#[tokio::test]
async fn test_host_stop_first_is_user_cancel() {
    let host = Arc::new(ConsoleHost::new());
    let controller = controller(&host, &fast_config());
    let status = controller.status();
    let saw_cancel = Arc::new(AtomicBool::new(false));

    let run = tokio::spawn(controller.run(looping_worker(saw_cancel.clone())));
    wait_for_state(&status, LifecycleState::Running).await;

    // Interactive interrupt forwarded by the host.
    host.request_stop();

    let reason = run.await.unwrap().unwrap();
    assert_eq!(reason.kind(), ExitKind::UserCancel);
    assert_eq!(reason.exit_code(), -1);
    assert!(saw_cancel.load(Ordering::SeqCst));
    assert!(status.is_cleanup_done());
}

#[tokio::test]
async fn test_os_close_blocks_callback_until_cleanup_done() {
    let host = Arc::new(ConsoleHost::new());
    let ticks = Arc::new(AtomicU32::new(0));
    let seen = ticks.clone();
    let controller = controller(&host, &fast_config()).with_cleanup_hook(Arc::new(
        move |_reason: &warden_core::ExitReason, n, _total| {
            seen.store(n, Ordering::SeqCst);
        },
    ));
    let status = controller.status();
    let adapter = controller.signal_adapter();
    let saw_cancel = Arc::new(AtomicBool::new(false));

    let run = tokio::spawn(controller.run(looping_worker(saw_cancel.clone())));
    wait_for_state(&status, LifecycleState::Running).await;

    let os_thread = {
        let status = status.clone();
        let ticks = ticks.clone();
        std::thread::spawn(move || {
            let handled = adapter.handle(ConsoleEvent::Close);
            // Observed the moment the OS callback is released.
            (handled, status.is_cleanup_done(), ticks.load(Ordering::SeqCst))
        })
    };

    let reason = run.await.unwrap().unwrap();
    let (handled, done_at_release, ticks_at_release) = os_thread.join().unwrap();

    assert_eq!(reason.kind(), ExitKind::Close);
    assert_eq!(reason.exit_code(), -2);
    assert!(handled);
    assert!(done_at_release);
    assert_eq!(ticks_at_release, 10);
    assert!(saw_cancel.load(Ordering::SeqCst));
    assert!(host.is_stop_requested());
}

#[tokio::test]
async fn test_cleanup_fault_still_releases_os_callback() {
    let host = Arc::new(ConsoleHost::new());
    let ticks = Arc::new(AtomicU32::new(0));
    let seen = ticks.clone();
    let controller = controller(&host, &fast_config()).with_cleanup_hook(Arc::new(
        move |_reason: &warden_core::ExitReason, n, _total| {
            seen.store(n, Ordering::SeqCst);
            if n == 2 {
                panic!("cleanup step {n} failed");
            }
        },
    ));
    let status = controller.status();
    let adapter = controller.signal_adapter();

    let run = tokio::spawn(controller.run(looping_worker(Arc::new(AtomicBool::new(false)))));
    wait_for_state(&status, LifecycleState::Running).await;

    let os_thread = std::thread::spawn(move || adapter.handle(ConsoleEvent::Close));

    let reason = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("controller hung after a cleanup fault")
        .unwrap()
        .unwrap();
    assert_eq!(reason.kind(), ExitKind::Close);
    assert_eq!(status.state(), LifecycleState::Stopped);
    assert!(status.is_cleanup_done());
    assert_eq!(ticks.load(Ordering::SeqCst), 10);
    assert!(os_thread.join().unwrap());
}

#[tokio::test]
async fn test_dropped_controller_releases_os_callback() {
    let host = Arc::new(ConsoleHost::new());
    let controller = controller(&host, &fast_config());
    let status = controller.status();
    let adapter = controller.signal_adapter();

    // Ignores its scope, so the controller sits in Draining.
    let run = tokio::spawn(controller.run(worker_fn(|_scope| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    })));
    wait_for_state(&status, LifecycleState::Running).await;

    let os_thread = std::thread::spawn(move || adapter.handle(ConsoleEvent::Shutdown));
    wait_for_state(&status, LifecycleState::Draining).await;

    run.abort();
    let _ = run.await;

    assert!(status.is_cleanup_done());
    assert!(os_thread.join().unwrap());
}

#[tokio::test]
async fn test_os_logoff_and_shutdown_codes() {
    for (event, kind, code) in [
        (ConsoleEvent::LogOff, ExitKind::LogOff, -5),
        (ConsoleEvent::Shutdown, ExitKind::Shutdown, -6),
    ] {
        let host = Arc::new(ConsoleHost::new());
        let controller = controller(&host, &fast_config());
        let status = controller.status();
        let adapter = controller.signal_adapter();

        let run = tokio::spawn(controller.run(looping_worker(Arc::new(AtomicBool::new(false)))));
        wait_for_state(&status, LifecycleState::Running).await;

        let os_thread = std::thread::spawn(move || adapter.handle(event));
        let reason = run.await.unwrap().unwrap();

        assert!(os_thread.join().unwrap());
        assert_eq!(reason.kind(), kind);
        assert_eq!(reason.exit_code(), code);
    }
}

#[tokio::test]
async fn test_interrupt_event_is_left_to_host() {
    let host = Arc::new(ConsoleHost::new());
    let controller = controller(&host, &fast_config());
    let status = controller.status();
    let adapter = controller.signal_adapter();

    let run = tokio::spawn(controller.run(looping_worker(Arc::new(AtomicBool::new(false)))));
    wait_for_state(&status, LifecycleState::Running).await;

    let handled = std::thread::spawn(move || adapter.handle(ConsoleEvent::Interrupt))
        .join()
        .unwrap();
    assert!(!handled);
    assert!(status.exit_reason().is_none());
    assert_eq!(status.state(), LifecycleState::Running);

    host.request_stop();
    let reason = run.await.unwrap().unwrap();
    assert_eq!(reason.kind(), ExitKind::UserCancel);
}

#[tokio::test]
async fn test_fault_racing_os_shutdown_latches_exactly_one() {
    for _ in 0..10 {
        let host = Arc::new(ConsoleHost::new());
        let controller = controller(&host, &fast_config());
        let status = controller.status();
        let adapter = controller.signal_adapter();
        let barrier = Arc::new(Barrier::new(2));
        let scope_slot: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));

        let worker = {
            let barrier = barrier.clone();
            let scope_slot = scope_slot.clone();
            worker_fn(move |scope: CancellationToken| async move {
                *scope_slot.lock().unwrap() = Some(scope);
                tokio::task::spawn_blocking(move || {
                    barrier.wait();
                })
                .await
                .unwrap();
                Err(WorkerError::Fault(anyhow::anyhow!("boom")))
            })
        };

        let run = tokio::spawn(controller.run(worker));
        let os_thread = std::thread::spawn(move || {
            barrier.wait();
            adapter.handle(ConsoleEvent::Shutdown)
        });

        let reason = run.await.unwrap().unwrap();
        assert!(os_thread.join().unwrap());

        assert!(matches!(reason.kind(), ExitKind::Error | ExitKind::Shutdown));
        assert_eq!(
            status.exit_reason().map(|r| r.kind()),
            Some(reason.kind()),
            "latched reason changed after the race"
        );
        let scope = scope_slot.lock().unwrap().clone().unwrap();
        assert!(scope.is_cancelled());
        assert!(status.is_cleanup_done());
    }
}

#[tokio::test]
async fn test_redundant_cancellation_runs_cleanup_once() {
    let host = Arc::new(ConsoleHost::new());
    let first_ticks = Arc::new(AtomicU32::new(0));
    let seen = first_ticks.clone();
    let controller = controller(&host, &fast_config()).with_cleanup_hook(Arc::new(
        move |_reason: &warden_core::ExitReason, n, _total| {
            if n == 1 {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        },
    ));
    let status = controller.status();
    let adapter = controller.signal_adapter();

    let run = tokio::spawn(controller.run(looping_worker(Arc::new(AtomicBool::new(false)))));
    wait_for_state(&status, LifecycleState::Running).await;

    let mut threads = Vec::new();
    for i in 0..8 {
        let host = host.clone();
        let adapter = adapter.clone();
        threads.push(std::thread::spawn(move || {
            if i % 4 == 0 {
                assert!(adapter.handle(ConsoleEvent::Close));
            } else {
                host.request_stop();
                host.stopping_token().cancel();
            }
        }));
    }

    let reason = run.await.unwrap().unwrap();
    for t in threads {
        t.join().unwrap();
    }

    assert!(matches!(reason.kind(), ExitKind::UserCancel | ExitKind::Close));
    assert_eq!(first_ticks.load(Ordering::SeqCst), 1);
    assert!(status.is_cleanup_done());
}

#[tokio::test]
async fn test_fault_while_draining_keeps_latched_reason() {
    let host = Arc::new(ConsoleHost::new());
    let controller = controller(&host, &fast_config());
    let status = controller.status();

    let run = tokio::spawn(controller.run(worker_fn(|scope: CancellationToken| async move {
        scope.cancelled().await;
        Err(WorkerError::Fault(anyhow::anyhow!("failed while stopping")))
    })));
    wait_for_state(&status, LifecycleState::Running).await;

    host.request_stop();
    let reason = run.await.unwrap().unwrap();
    assert_eq!(reason.kind(), ExitKind::UserCancel);
    assert!(status.is_cleanup_done());
}

#[tokio::test]
async fn test_status_wait_for_cleanup() {
    let host = Arc::new(ConsoleHost::new());
    let controller = controller(&host, &fast_config());
    let status = controller.status();

    let run = tokio::spawn(controller.run(looping_worker(Arc::new(AtomicBool::new(false)))));
    wait_for_state(&status, LifecycleState::Running).await;
    assert!(!status.is_cleanup_done());

    host.request_stop();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for_cleanup())
        .await
        .expect("cleanup never finished");
    assert!(status.is_cleanup_done());
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_required_registration_failure_refuses_to_start() {
    let mut config = fast_config();
    config.lifecycle.signal_registration = SignalRegistrationPolicy::Required;

    let host = Arc::new(ConsoleHost::new());
    let controller =
        LifecycleController::new(host.clone(), &config).with_signal_registrar(refuse_registration);
    let status = controller.status();
    let started = Arc::new(AtomicBool::new(false));

    let result = {
        let started = started.clone();
        controller
            .run(worker_fn(move |_scope| async move {
                started.store(true, Ordering::SeqCst);
                Ok(())
            }))
            .await
    };

    match result {
        Err(LifecycleError::SignalRegistration(e)) => {
            assert!(e.to_string().contains("access denied"))
        }
        other => panic!("expected registration failure, got {other:?}"),
    }
    assert!(!started.load(Ordering::SeqCst));
    assert_eq!(status.state(), LifecycleState::Starting);
    assert!(status.exit_reason().is_none());
    assert!(!host.is_stop_requested());
}

#[tokio::test]
async fn test_best_effort_registration_failure_runs_degraded() {
    let mut config = fast_config();
    config.lifecycle.signal_registration = SignalRegistrationPolicy::BestEffort;

    let host = Arc::new(ConsoleHost::new());
    let controller =
        LifecycleController::new(host.clone(), &config).with_signal_registrar(refuse_registration);
    let status = controller.status();

    let reason = controller
        .run(worker_fn(|_scope| async { Ok(()) }))
        .await
        .unwrap();

    assert_eq!(reason.kind(), ExitKind::Normal);
    assert_eq!(status.state(), LifecycleState::Stopped);
    assert!(status.is_cleanup_done());
}
