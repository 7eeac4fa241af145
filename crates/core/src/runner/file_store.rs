//! File-based runner registry storage

use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::model::RunnerInfo;
use crate::{Error, Result};

/// File-based runner store using JSON, keyed by derived runner id
pub struct FileRunnerStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, RunnerInfo>>,
}

impl FileRunnerStore {
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let runners: Vec<RunnerInfo> = serde_json::from_str(&content)?;
            runners
                .into_iter()
                .map(|r| (r.runner_id.clone(), r))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    async fn persist(&self) -> Result<()> {
        let cache = self.cache.read().await;
        let runners: Vec<&RunnerInfo> = cache.values().collect();
        let content = serde_json::to_string_pretty(&runners)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Insert or replace a runner record (registration is idempotent).
    pub async fn upsert(&self, runner: RunnerInfo) -> Result<RunnerInfo> {
        {
            let mut cache = self.cache.write().await;
            cache.insert(runner.runner_id.clone(), runner.clone());
        }
        self.persist().await?;
        Ok(runner)
    }

    pub async fn get(&self, runner_id: &str) -> Result<Option<RunnerInfo>> {
        let cache = self.cache.read().await;
        Ok(cache.get(runner_id).cloned())
    }

    pub async fn list(&self) -> Result<Vec<RunnerInfo>> {
        let cache = self.cache.read().await;
        let mut runners: Vec<RunnerInfo> = cache.values().cloned().collect();
        runners.sort_by(|a, b| a.runner_id.cmp(&b.runner_id));
        Ok(runners)
    }

    /// Apply `f` to the stored record, persisting the change.
    pub async fn update<F>(&self, runner_id: &str, f: F) -> Result<RunnerInfo>
    where
        F: FnOnce(&mut RunnerInfo),
    {
        let updated = {
            let mut cache = self.cache.write().await;
            let runner = cache
                .get_mut(runner_id)
                .ok_or_else(|| Error::RunnerNotFound(runner_id.to_string()))?;
            f(runner);
            runner.clone()
        };
        self.persist().await?;
        Ok(updated)
    }

    /// Delete a runner record. Returns true if it existed.
    pub async fn delete(&self, runner_id: &str) -> Result<bool> {
        let removed = {
            let mut cache = self.cache.write().await;
            cache.remove(runner_id).is_some()
        };
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }
}
