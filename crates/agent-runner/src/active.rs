//! Tracking of in-flight runs
//!
//! Each executing run gets a [`RunHandle`] with a cancellation token
//! that is a child of the runner-wide root token, so a shutdown cancels
//! everything while a targeted stop cancels one run.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub session_id: Uuid,
    pub stop: CancellationToken,
}

#[derive(Debug)]
pub struct ActiveRuns {
    root: CancellationToken,
    runs: RwLock<HashMap<Uuid, RunHandle>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, run_id: Uuid, session_id: Uuid) -> RunHandle {
        let handle = RunHandle {
            run_id,
            session_id,
            stop: self.root.child_token(),
        };
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id, handle.clone());
        handle
    }

    pub fn remove(&self, run_id: Uuid) {
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&run_id);
    }

    /// Cancel one run. Returns false when the run is not (or no longer)
    /// active here.
    pub fn stop(&self, run_id: Uuid) -> bool {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        match runs.get(&run_id) {
            Some(handle) => {
                handle.stop.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_many(&self, run_ids: &[Uuid]) -> usize {
        run_ids.iter().filter(|id| self.stop(**id)).count()
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Cancel every active run. Used on shutdown.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

impl Default for ActiveRuns {
    fn default() -> Self {
        Self::new()
    }
}
