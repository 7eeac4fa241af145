//! Executor profiles
//!
//! A profile names the executor adapter command a claimed run is handed
//! to. Adapters speak the versioned stdin/stdout contract in
//! [`crate::payload`] and [`crate::output`].

use crate::error::{Result, RunnerError};

/// Built-in executor profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorProfile {
    ClaudeCode,
    Codex,
    OpenCode,
    GeminiCli,
}

impl ExecutorProfile {
    /// Parse a profile from its CLI name
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "claude-code" | "claudecode" => Ok(Self::ClaudeCode),
            "codex" => Ok(Self::Codex),
            "opencode" => Ok(Self::OpenCode),
            "gemini-cli" | "geminicli" | "gemini" => Ok(Self::GeminiCli),
            _ => Err(RunnerError::UnknownProfile {
                profile: s.to_string(),
            }),
        }
    }

    /// Get the canonical string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Codex => "codex",
            Self::OpenCode => "opencode",
            Self::GeminiCli => "gemini-cli",
        }
    }

    /// The adapter command this profile spawns.
    /// `AGENT_ORCHESTRATOR_EXECUTOR_CMD` overrides it for any profile.
    pub fn command(&self) -> String {
        if let Ok(cmd) = std::env::var("AGENT_ORCHESTRATOR_EXECUTOR_CMD") {
            if !cmd.trim().is_empty() {
                return cmd;
            }
        }
        let default = match self {
            Self::ClaudeCode => {
                if cfg!(target_os = "windows") {
                    "claude-code-executor.cmd"
                } else {
                    "claude-code-executor"
                }
            }
            Self::Codex => "codex-executor",
            Self::OpenCode => "opencode-executor",
            Self::GeminiCli => "gemini-executor",
        };
        default.to_string()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "Claude Code CLI adapter",
            Self::Codex => "Codex CLI adapter",
            Self::OpenCode => "OpenCode adapter",
            Self::GeminiCli => "Gemini CLI adapter",
        }
    }

    pub fn all() -> &'static [ExecutorProfile] {
        &[
            Self::ClaudeCode,
            Self::Codex,
            Self::OpenCode,
            Self::GeminiCli,
        ]
    }
}

/// Print the profile table for `--profile-list`.
pub fn print_profile_table() {
    println!("{:<12} {:<24} DESCRIPTION", "PROFILE", "COMMAND");
    for profile in ExecutorProfile::all() {
        println!(
            "{:<12} {:<24} {}",
            profile.as_str(),
            profile.command(),
            profile.description()
        );
    }
}
