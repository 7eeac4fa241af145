//! Claim loop
//!
//! Long-polls the coordinator for runs and hands each claim to the
//! supervisor. A semaphore caps concurrent executions; claim errors
//! back off, and a 401/404 answer means the registration was swept and
//! must be redone.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ao_core::api::RegisterRunnerRequest;

use crate::client::backoff_delay;
use crate::supervisor::{execute_run, RunContext};

/// Pause after an empty poll so a coordinator that answers immediately
/// cannot turn the loop hot.
const IDLE_PAUSE_MS: u64 = 50;

pub struct Poller {
    ctx: RunContext,
    register_req: RegisterRunnerRequest,
    poll_timeout_secs: u64,
    require_tagged: bool,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Poller {
    pub fn new(
        ctx: RunContext,
        register_req: RegisterRunnerRequest,
        poll_timeout_secs: u64,
        require_tagged: bool,
        max_concurrent_runs: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            register_req,
            poll_timeout_secs,
            require_tagged,
            semaphore: Arc::new(Semaphore::new(max_concurrent_runs)),
            shutdown,
        }
    }

    pub async fn run(self) {
        let mut failures: u32 = 0;
        loop {
            // Take an execution slot before claiming so a full runner
            // does not steal runs it cannot start.
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let claimed = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    drop(permit);
                    break;
                }
                result = self
                    .ctx
                    .client
                    .claim(self.poll_timeout_secs, self.require_tagged) => result,
            };

            match claimed {
                Ok(Some(run)) => {
                    failures = 0;
                    info!(
                        run_id = %run.run_id,
                        agent = %run.agent_name,
                        "Claimed run"
                    );
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        execute_run(ctx, run).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    failures = 0;
                    drop(permit);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_millis(IDLE_PAUSE_MS)) => {}
                    }
                }
                Err(e) if e.needs_reregistration() => {
                    drop(permit);
                    warn!("Coordinator no longer recognizes this runner: {e}");
                    match self.ctx.client.register(&self.register_req).await {
                        Ok(_) => {
                            info!("Re-registered with coordinator");
                            failures = 0;
                        }
                        Err(re) => {
                            warn!("Re-registration failed: {re}");
                            self.pause(failures).await;
                            failures = failures.saturating_add(1);
                        }
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!("Claim failed: {e}");
                    self.pause(failures).await;
                    failures = failures.saturating_add(1);
                }
            }
        }
        info!("Poller stopped");
    }

    async fn pause(&self, failures: u32) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(backoff_delay(failures)) => {}
        }
    }
}
