//! Runner configuration
//!
//! CLI flags plus `AGENT_ORCHESTRATOR_*` environment tunables, resolved
//! once at startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::profile::ExecutorProfile;

const DEFAULT_POLL_TIMEOUT_SECS: u64 = 25;
const DEFAULT_HEARTBEAT_SECS: u64 = 60;
const DEFAULT_MAX_CONCURRENT_RUNS: usize = 2;
const DEFAULT_STOP_GRACE_SECS: u64 = 5;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Resolved runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub coordinator_url: String,
    pub profile: ExecutorProfile,
    pub tags: Vec<String>,
    pub project_dir: PathBuf,
    pub require_matching_tags: bool,
    /// Long-poll window sent on each claim request
    pub poll_timeout_secs: u64,
    pub heartbeat_interval: Duration,
    pub max_concurrent_runs: usize,
    /// Window between asking an executor to stop and killing it
    pub stop_grace: Duration,
    /// 0 asks the OS for an ephemeral facade port
    pub mcp_port: u16,
    pub external_mcp_url: Option<String>,
}

impl RunnerConfig {
    pub fn from_cli(cli: &Cli) -> crate::error::Result<Self> {
        let profile = ExecutorProfile::from_str(&cli.profile)?;
        let project_dir = match &cli.project_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        Ok(Self {
            coordinator_url: cli.coordinator_url.trim_end_matches('/').to_string(),
            profile,
            tags: cli
                .tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            project_dir,
            require_matching_tags: cli.require_matching_tags,
            poll_timeout_secs: env_u64(
                "AGENT_ORCHESTRATOR_POLL_TIMEOUT_SECS",
                DEFAULT_POLL_TIMEOUT_SECS,
            ),
            heartbeat_interval: Duration::from_secs(env_u64(
                "AGENT_ORCHESTRATOR_HEARTBEAT_SECS",
                DEFAULT_HEARTBEAT_SECS,
            )),
            max_concurrent_runs: env_u64(
                "AGENT_ORCHESTRATOR_MAX_CONCURRENT_RUNS",
                DEFAULT_MAX_CONCURRENT_RUNS as u64,
            ) as usize,
            stop_grace: Duration::from_secs(env_u64(
                "AGENT_ORCHESTRATOR_STOP_GRACE_SECS",
                DEFAULT_STOP_GRACE_SECS,
            )),
            mcp_port: cli.mcp_port.unwrap_or(0),
            external_mcp_url: cli.external_mcp_url.clone(),
        })
    }
}

/// What this runner knows about itself once registered; feeds the
/// `${runner.*}` resolution pass and the executor payload.
#[derive(Debug, Clone)]
pub struct RunnerIdentity {
    pub runner_id: String,
    pub hostname: String,
    pub project_dir: String,
    pub profile: ExecutorProfile,
    /// Loopback gateway address handed to executors as their API URL
    pub gateway_url: String,
    /// Facade (or external) MCP endpoint
    pub orchestrator_mcp_url: String,
}

/// Hostname from the OS, `HOSTNAME` env as fallback.
pub fn detect_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_resolve_from_minimal_cli() {
        let cli = Cli::parse_from(["agent-runner"]);
        let config = RunnerConfig::from_cli(&cli).unwrap();
        assert_eq!(config.profile, ExecutorProfile::ClaudeCode);
        assert_eq!(config.max_concurrent_runs, DEFAULT_MAX_CONCURRENT_RUNS);
        assert_eq!(config.stop_grace, Duration::from_secs(5));
        assert_eq!(config.mcp_port, 0);
    }

    #[test]
    fn unknown_profile_is_a_startup_error() {
        let cli = Cli::parse_from(["agent-runner", "--profile", "mystery"]);
        assert!(RunnerConfig::from_cli(&cli).is_err());
    }

    #[test]
    fn blank_tags_are_dropped() {
        let cli = Cli::parse_from(["agent-runner", "--tags", "gpu, ,env:prod"]);
        let config = RunnerConfig::from_cli(&cli).unwrap();
        assert_eq!(config.tags, vec!["gpu".to_string(), "env:prod".to_string()]);
    }

    #[test]
    fn detect_hostname_never_empty() {
        assert!(!detect_hostname().is_empty());
    }
}
