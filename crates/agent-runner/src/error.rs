//! Error types for the runner

use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while claiming and executing runs
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Coordinator rejected a request or could not be reached
    #[error("Coordinator request failed: {message}")]
    Api {
        /// HTTP status when the coordinator answered at all
        status: Option<u16>,
        message: String,
    },

    /// Failed to spawn the executor subprocess
    #[error("Failed to spawn executor: {message}")]
    SpawnFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Unknown executor profile
    #[error("Unknown executor profile: {profile}")]
    UnknownProfile { profile: String },

    /// No credentials yet; register first
    #[error("Runner is not registered with the coordinator")]
    NotRegistered,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    /// Create an Api error for a transport-level failure (no response)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            message: message.into(),
        }
    }

    /// Create an Api error from an HTTP status + body
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a SpawnFailed error
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a SpawnFailed error with source
    pub fn spawn_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: Some(source),
        }
    }

    /// True when the coordinator no longer recognizes this runner and it
    /// should go back through registration.
    pub fn needs_reregistration(&self) -> bool {
        matches!(
            self,
            Self::Api {
                status: Some(401 | 404),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_missing_statuses_trigger_reregistration() {
        assert!(RunnerError::api(401, "expired").needs_reregistration());
        assert!(RunnerError::api(404, "unknown runner").needs_reregistration());
        assert!(!RunnerError::api(500, "boom").needs_reregistration());
        assert!(!RunnerError::transport("refused").needs_reregistration());
    }
}
