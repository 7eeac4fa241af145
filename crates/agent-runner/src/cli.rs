//! Command-line interface for the runner

use clap::Parser;
use std::path::PathBuf;

/// Claims agent runs from a coordinator and executes them locally
#[derive(Parser, Debug)]
#[command(name = "agent-runner")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Coordinator base URL
    #[arg(
        long,
        env = "AGENT_ORCHESTRATOR_API_URL",
        default_value = "http://localhost:8090"
    )]
    pub coordinator_url: String,

    /// Executor profile claimed runs are handed to
    #[arg(long, default_value = "claude-code")]
    pub profile: String,

    /// Print the built-in executor profiles and exit
    #[arg(long)]
    pub profile_list: bool,

    /// Capability tags this runner advertises (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Directory runs execute in (defaults to the current directory)
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Port for the embedded orchestration facade (0 = ephemeral)
    #[arg(long, conflicts_with = "external_mcp_url")]
    pub mcp_port: Option<u16>,

    /// Use an external MCP server instead of the embedded facade
    #[arg(long)]
    pub external_mcp_url: Option<String>,

    /// Only claim runs that demand at least one tag
    #[arg(long)]
    pub require_matching_tags: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["agent-runner"]);
        assert_eq!(cli.profile, "claude-code");
        assert!(cli.tags.is_empty());
        assert!(!cli.require_matching_tags);
    }

    #[test]
    fn splits_tags_on_commas() {
        let cli = Cli::parse_from(["agent-runner", "--tags", "gpu,env:prod"]);
        assert_eq!(cli.tags, vec!["gpu".to_string(), "env:prod".to_string()]);
    }

    #[test]
    fn mcp_port_conflicts_with_external_url() {
        let result = Cli::try_parse_from([
            "agent-runner",
            "--mcp-port",
            "9000",
            "--external-mcp-url",
            "http://mcp.internal:9100/mcp",
        ]);
        assert!(result.is_err());
    }
}
