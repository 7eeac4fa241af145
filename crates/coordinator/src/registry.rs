//! Runner registry and lifecycle sweep
//!
//! Registration is idempotent: a runner id is a pure function of the
//! (hostname, project_dir, executor_type) triple, so a restarted runner
//! reclaims its record instead of registering as a stranger. A background
//! sweep marks silent runners stale and eventually deletes them; the sweep
//! task is owned by the registry and stopped through its cancellation
//! token together with the server.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ao_core::api::RegisterRunnerRequest;
use ao_core::runner::{FileRunnerStore, RunnerInfo, RunnerStatus};
use ao_core::Result;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Heartbeat age after which an online runner is marked stale.
    pub stale_after: Duration,
    /// Heartbeat age after which a stale runner is deleted.
    pub remove_after: Duration,
    /// How often the sweep runs.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(120),
            remove_after: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    /// Defaults overridden by environment, for operator tuning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_secs("AGENT_ORCHESTRATOR_STALE_SECS") {
            config.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("AGENT_ORCHESTRATOR_REMOVE_SECS") {
            config.remove_after = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("AGENT_ORCHESTRATOR_SWEEP_SECS") {
            config.sweep_interval = Duration::from_secs(secs);
        }
        config
    }
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

/// What a single sweep did, for logging and tests.
#[derive(Debug, Default, PartialEq)]
pub struct SweepOutcome {
    pub marked_stale: Vec<String>,
    pub removed: Vec<String>,
}

pub struct RunnerRegistry {
    store: Arc<FileRunnerStore>,
    config: RegistryConfig,
    cancel: CancellationToken,
}

impl RunnerRegistry {
    pub fn new(store: Arc<FileRunnerStore>, config: RegistryConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Register or reconnect a runner. Returns the stored record and
    /// whether it was newly created.
    pub async fn register(&self, req: &RegisterRunnerRequest) -> Result<(RunnerInfo, bool)> {
        req.validate()?;

        let incoming = RunnerInfo::new(
            &req.hostname,
            &req.project_dir,
            &req.executor_type,
            req.tags.clone(),
        );

        match self.store.get(&incoming.runner_id).await? {
            Some(_) => {
                // Reconnection: keep the record, refresh liveness, replace tags.
                let tags = req.tags.clone();
                let updated = self
                    .store
                    .update(&incoming.runner_id, |r| {
                        r.tags = tags;
                        r.touch();
                    })
                    .await?;
                info!("Runner {} reconnected", updated.runner_id);
                Ok((updated, false))
            }
            None => {
                let created = self.store.upsert(incoming).await?;
                info!(
                    "Runner {} registered ({} @ {})",
                    created.runner_id, created.executor_type, created.hostname
                );
                Ok((created, true))
            }
        }
    }

    /// Record a heartbeat. Unknown runners get `RunnerNotFound`, which the
    /// runner answers by re-registering.
    pub async fn heartbeat(&self, runner_id: &str) -> Result<RunnerInfo> {
        self.store.update(runner_id, |r| r.touch()).await
    }

    pub async fn get(&self, runner_id: &str) -> Result<Option<RunnerInfo>> {
        self.store.get(runner_id).await
    }

    pub async fn list(&self) -> Result<Vec<RunnerInfo>> {
        self.store.list().await
    }

    /// Graceful removal on runner shutdown.
    pub async fn deregister(&self, runner_id: &str) -> Result<bool> {
        let removed = self.store.delete(runner_id).await?;
        if removed {
            info!("Runner {} deregistered", runner_id);
        }
        Ok(removed)
    }

    /// One sweep pass against the given clock.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome::default();

        for runner in self.store.list().await? {
            let age = runner.heartbeat_age_secs(now);
            match runner.status {
                RunnerStatus::Online if age > self.config.stale_after.as_secs() as i64 => {
                    warn!(
                        "Runner {} has not heartbeat for {}s, marking stale",
                        runner.runner_id, age
                    );
                    self.store
                        .update(&runner.runner_id, |r| r.status = RunnerStatus::Stale)
                        .await?;
                    outcome.marked_stale.push(runner.runner_id);
                }
                RunnerStatus::Stale if age > self.config.remove_after.as_secs() as i64 => {
                    warn!(
                        "Runner {} has not heartbeat for {}s, removing from registry",
                        runner.runner_id, age
                    );
                    self.store.delete(&runner.runner_id).await?;
                    outcome.removed.push(runner.runner_id);
                }
                _ => {}
            }
        }

        Ok(outcome)
    }

    /// Start the periodic sweep. Runs until [`shutdown`](Self::shutdown).
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.sweep_interval);
            // The first tick fires immediately; skip it so a restart doesn't
            // sweep before runners had a chance to reconnect.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Registry sweep stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = registry.sweep_at(Utc::now()).await {
                            error!("Registry sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
