//! File-based run storage implementation
//!
//! Stores runs as JSON in a file on disk. Claims and status transitions
//! happen entirely under the cache's write lock, which is what makes a
//! concurrent claim on the same run resolve to exactly one winner.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{Run, RunStatus, TransitionOutcome};
use super::repository::{ClaimFilter, RunRepository};
use crate::{Error, Result};

/// File-based run store using JSON
pub struct FileRunStore {
    /// Path to the JSON file
    path: PathBuf,
    /// In-memory cache of runs
    cache: RwLock<HashMap<Uuid, Run>>,
}

impl FileRunStore {
    /// Create a new FileRunStore
    ///
    /// If the file doesn't exist, it will be created on first write.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let runs: Vec<Run> = serde_json::from_str(&content)?;
            runs.into_iter().map(|r| (r.id, r)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    /// Persist the cache to disk
    async fn persist(&self) -> Result<()> {
        let cache = self.cache.read().await;
        let runs: Vec<&Run> = cache.values().collect();
        let content = serde_json::to_string_pretty(&runs)?;

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    fn active_sessions(cache: &HashMap<Uuid, Run>) -> HashSet<Uuid> {
        cache
            .values()
            .filter(|r| r.status.is_active())
            .map(|r| r.session_id)
            .collect()
    }
}

#[async_trait]
impl RunRepository for FileRunStore {
    async fn create(&self, run: Run) -> Result<Run> {
        {
            let mut cache = self.cache.write().await;
            if cache.contains_key(&run.id) {
                return Err(Error::InvalidInput(format!(
                    "Run with ID {} already exists",
                    run.id
                )));
            }
            cache.insert(run.id, run.clone());
        }
        self.persist().await?;
        Ok(run)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Run>> {
        let cache = self.cache.read().await;
        Ok(cache.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Run>> {
        let cache = self.cache.read().await;
        let mut runs: Vec<Run> = cache.values().cloned().collect();
        // Sort by created_at descending (newest first)
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn list_by_session(&self, session_id: Uuid) -> Result<Vec<Run>> {
        let cache = self.cache.read().await;
        let mut runs: Vec<Run> = cache
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn claim_next(&self, filter: &ClaimFilter) -> Result<Option<Run>> {
        let claimed = {
            let mut cache = self.cache.write().await;
            let busy_sessions = Self::active_sessions(&cache);

            let mut candidates: Vec<Uuid> = cache
                .values()
                .filter(|r| {
                    r.status == RunStatus::Pending
                        && !r.stop_requested
                        && filter.satisfies(&r.demands)
                        && !busy_sessions.contains(&r.session_id)
                })
                .map(|r| r.id)
                .collect();
            candidates.sort_by_key(|id| cache[id].created_at);

            match candidates.first() {
                Some(id) => {
                    let run = cache.get_mut(id).ok_or_else(|| {
                        Error::Storage("claim candidate vanished from cache".to_string())
                    })?;
                    run.mark_claimed(&filter.runner_id)?;
                    Some(run.clone())
                }
                None => None,
            }
        };

        if claimed.is_some() {
            self.persist().await?;
        }
        Ok(claimed)
    }

    async fn transition(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<String>,
        result: Option<String>,
    ) -> Result<(Run, TransitionOutcome)> {
        let (run, outcome) = {
            let mut cache = self.cache.write().await;
            let run = cache
                .get_mut(&id)
                .ok_or_else(|| Error::RunNotFound(id.to_string()))?;
            let outcome = run.apply_report(status, error, result)?;
            (run.clone(), outcome)
        };

        if outcome == TransitionOutcome::Applied {
            self.persist().await?;
        }
        Ok((run, outcome))
    }

    async fn request_stop(&self, id: Uuid) -> Result<(Run, bool)> {
        let (run, stopped_now) = {
            let mut cache = self.cache.write().await;
            let run = cache
                .get_mut(&id)
                .ok_or_else(|| Error::RunNotFound(id.to_string()))?;
            let stopped_now = match run.status {
                // Never claimed: nothing to signal, stop it outright.
                RunStatus::Pending => {
                    run.apply_report(RunStatus::Stopped, None, None)?;
                    true
                }
                RunStatus::Claimed | RunStatus::Running => {
                    run.stop_requested = true;
                    false
                }
                // Terminal: duplicate stop, absorb.
                _ => false,
            };
            (run.clone(), stopped_now)
        };
        self.persist().await?;
        Ok((run, stopped_now))
    }

    async fn pending_stops(&self, runner_id: &str) -> Result<Vec<Uuid>> {
        let cache = self.cache.read().await;
        let mut ids: Vec<Uuid> = cache
            .values()
            .filter(|r| {
                r.stop_requested
                    && r.status.is_active()
                    && r.runner_id.as_deref() == Some(runner_id)
            })
            .map(|r| r.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
