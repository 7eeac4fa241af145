//! Run repository trait
//!
//! Defines the interface for run storage. The claim and status-transition
//! operations are part of the interface so implementations can make them
//! atomic under their own concurrency control — a claim race here is how
//! a run would get executed twice.

use async_trait::async_trait;
use uuid::Uuid;

use super::model::{Run, RunStatus, TransitionOutcome};
use crate::Result;

/// What a claiming runner brings to the table.
#[derive(Debug, Clone)]
pub struct ClaimFilter {
    pub runner_id: String,
    pub tags: Vec<String>,
    /// Only claim runs that declare at least one demand.
    pub require_tagged: bool,
}

impl ClaimFilter {
    pub fn new(runner_id: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            runner_id: runner_id.into(),
            tags,
            require_tagged: false,
        }
    }

    pub fn require_tagged(mut self, require: bool) -> Self {
        self.require_tagged = require;
        self
    }

    /// Every demanded tag must be present in this runner's tag set.
    pub fn satisfies(&self, demands: &[String]) -> bool {
        if self.require_tagged && demands.is_empty() {
            return false;
        }
        demands.iter().all(|d| self.tags.iter().any(|t| t == d))
    }
}

/// Repository interface for run records
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Persist a new run
    async fn create(&self, run: Run) -> Result<Run>;

    /// Get a run by ID
    async fn get(&self, id: Uuid) -> Result<Option<Run>>;

    /// Get all runs
    async fn list(&self) -> Result<Vec<Run>>;

    /// Runs belonging to a session, oldest first
    async fn list_by_session(&self, session_id: Uuid) -> Result<Vec<Run>>;

    /// Atomically claim the oldest pending run the filter can satisfy.
    ///
    /// Skips runs whose session already has a claimed/running run (sessions
    /// are single-threaded with respect to their run history). Returns
    /// `None` when nothing is claimable right now.
    async fn claim_next(&self, filter: &ClaimFilter) -> Result<Option<Run>>;

    /// Atomically apply a reported status. Duplicate reports onto a
    /// terminal run return `AlreadyTerminal` with the record unchanged.
    async fn transition(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<String>,
        result: Option<String>,
    ) -> Result<(Run, TransitionOutcome)>;

    /// Flag a claimed/running run for stopping; pending runs go straight
    /// to `stopped`. The bool is true when this call itself landed the run
    /// terminal (a pending run with no runner to signal).
    async fn request_stop(&self, id: Uuid) -> Result<(Run, bool)>;

    /// Stop-flagged, still-active runs claimed by this runner.
    async fn pending_stops(&self, runner_id: &str) -> Result<Vec<Uuid>>;
}
