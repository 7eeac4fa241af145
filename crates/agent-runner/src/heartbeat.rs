//! Heartbeat loop
//!
//! Keeps the registration alive and applies the stop requests the
//! coordinator piggybacks on the response. Heartbeat failures never
//! touch running executors; only explicit stop ids do.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ao_core::api::RegisterRunnerRequest;

use crate::active::ActiveRuns;
use crate::client::CoordinatorApi;

pub async fn run_heartbeat_loop(
    client: Arc<dyn CoordinatorApi>,
    active: Arc<ActiveRuns>,
    register_req: RegisterRunnerRequest,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match client.heartbeat().await {
            Ok(response) => {
                if !response.stop_run_ids.is_empty() {
                    info!(
                        requested = response.stop_run_ids.len(),
                        "Coordinator requested run stops"
                    );
                    let stopped = active.stop_many(&response.stop_run_ids);
                    debug!(stopped, "Stop requests applied");
                }
            }
            Err(e) if e.needs_reregistration() => {
                warn!("Heartbeat rejected, re-registering: {e}");
                if let Err(re) = client.register(&register_req).await {
                    warn!("Re-registration failed: {re}");
                }
            }
            Err(e) => {
                warn!("Heartbeat failed: {e}");
            }
        }
    }
    info!("Heartbeat loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeCoordinator;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn register_req() -> RegisterRunnerRequest {
        RegisterRunnerRequest {
            hostname: "test-host".to_string(),
            project_dir: "/tmp".to_string(),
            executor_type: "claude-code".to_string(),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn stop_ids_cancel_matching_active_runs() {
        let client = Arc::new(FakeCoordinator::new());
        let active = Arc::new(ActiveRuns::new());
        let handle = active.insert(Uuid::new_v4(), Uuid::new_v4());
        let untouched = active.insert(Uuid::new_v4(), Uuid::new_v4());
        client.stop_run_ids.lock().unwrap().push(handle.run_id);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat_loop(
            client.clone(),
            active.clone(),
            register_req(),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if handle.stop.is_cancelled() {
                break;
            }
        }
        shutdown.cancel();
        task.await.unwrap();

        assert!(handle.stop.is_cancelled());
        assert!(!untouched.stop.is_cancelled());
    }

    #[tokio::test]
    async fn rejected_heartbeat_reregisters() {
        let client = Arc::new(FakeCoordinator::new());
        let active = Arc::new(ActiveRuns::new());
        *client.fail_next_heartbeat_status.lock().unwrap() = Some(404);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat_loop(
            client.clone(),
            active,
            register_req(),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if client.register_calls.load(Ordering::SeqCst) > 0 {
                break;
            }
        }
        shutdown.cancel();
        task.await.unwrap();

        assert!(client.register_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn transient_heartbeat_failure_is_tolerated() {
        let client = Arc::new(FakeCoordinator::new());
        let active = Arc::new(ActiveRuns::new());
        let handle = active.insert(Uuid::new_v4(), Uuid::new_v4());
        *client.fail_next_heartbeat_status.lock().unwrap() = Some(500);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat_loop(
            client.clone(),
            active.clone(),
            register_req(),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown.cancel();
        task.await.unwrap();

        // A 500 never re-registers and never cancels work.
        assert_eq!(client.register_calls.load(Ordering::SeqCst), 0);
        assert!(!handle.stop.is_cancelled());
    }
}
