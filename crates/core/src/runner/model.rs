//! Runner registry records and identity derivation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Liveness of a registered runner
///
/// There is no `removed` state: a runner past the removal threshold is
/// deleted from the registry, and re-registration recreates it under the
/// same derived id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Online,
    Stale,
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerStatus::Online => "online",
            RunnerStatus::Stale => "stale",
        }
    }
}

/// Derive a stable runner id from its identity fields.
///
/// The same machine + project directory + executor always maps to the same
/// id, so a restarted runner reclaims its registry entry instead of
/// accumulating duplicates.
pub fn derive_runner_id(hostname: &str, project_dir: &str, executor_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(b"\n");
    hasher.update(project_dir.as_bytes());
    hasher.update(b"\n");
    hasher.update(executor_type.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("runner-{}", &digest[..12])
}

/// A registered runner as stored by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerInfo {
    pub runner_id: String,
    pub hostname: String,
    pub project_dir: String,
    pub executor_type: String,
    pub tags: Vec<String>,
    pub status: RunnerStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl RunnerInfo {
    pub fn new(
        hostname: impl Into<String>,
        project_dir: impl Into<String>,
        executor_type: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        let hostname = hostname.into();
        let project_dir = project_dir.into();
        let executor_type = executor_type.into();
        let runner_id = derive_runner_id(&hostname, &project_dir, &executor_type);
        let now = Utc::now();
        Self {
            runner_id,
            hostname,
            project_dir,
            executor_type,
            tags,
            status: RunnerStatus::Online,
            registered_at: now,
            last_heartbeat_at: now,
        }
    }

    /// Record a heartbeat: a stale runner comes back online.
    pub fn touch(&mut self) {
        self.last_heartbeat_at = Utc::now();
        self.status = RunnerStatus::Online;
    }

    /// Seconds since the last heartbeat, as seen from `now`.
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat_at).num_seconds()
    }
}
