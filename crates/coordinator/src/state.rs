//! Application state

use std::path::PathBuf;
use std::sync::Arc;

use ao_core::run::FileRunStore;
use ao_core::session::FileSessionStore;

use crate::agents::BlueprintLibrary;
use crate::queue::RunQueue;
use crate::registry::{RegistryConfig, RunnerRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pub queue: RunQueue,
    pub registry: Arc<RunnerRegistry>,
    pub sessions: Arc<FileSessionStore>,
    pub agents: BlueprintLibrary,
}

impl AppState {
    /// Create a new AppState rooted at the given data directory
    pub async fn new(
        data_dir: PathBuf,
        agents_dir: PathBuf,
        registry_config: RegistryConfig,
    ) -> ao_core::Result<Self> {
        let runs = Arc::new(FileRunStore::new(data_dir.join("runs.json")).await?);
        let sessions = Arc::new(
            FileSessionStore::new(
                data_dir.join("sessions.json"),
                data_dir.join("session-events"),
            )
            .await?,
        );
        let runners = Arc::new(
            ao_core::runner::FileRunnerStore::new(data_dir.join("runners.json")).await?,
        );

        let agents = BlueprintLibrary::new(&agents_dir);
        let queue = RunQueue::new(runs, Arc::clone(&sessions), agents.clone());
        let registry = Arc::new(RunnerRegistry::new(runners, registry_config));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                queue,
                registry,
                sessions,
                agents,
            }),
        })
    }

    /// Get reference to the run queue
    pub fn queue(&self) -> &RunQueue {
        &self.inner.queue
    }

    /// Get reference to the runner registry
    pub fn registry(&self) -> &Arc<RunnerRegistry> {
        &self.inner.registry
    }

    /// Get reference to the session store
    pub fn sessions(&self) -> &FileSessionStore {
        &self.inner.sessions
    }

    /// Get reference to the blueprint library
    pub fn agents(&self) -> &BlueprintLibrary {
        &self.inner.agents
    }
}
