//! Agent blueprint library
//!
//! One JSON document per agent in a flat directory, addressed by file stem.
//! Files are read fresh on every request so blueprint edits take effect
//! without a restart.

use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use ao_core::api::AgentSummary;
use ao_core::{Error, Result};

#[derive(Clone)]
pub struct BlueprintLibrary {
    dir: PathBuf,
}

impl BlueprintLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Agent names double as file stems, so the charset is restricted.
    fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }

    /// Load an agent's blueprint document.
    pub async fn load(&self, agent_name: &str) -> Result<Value> {
        if !Self::is_valid_name(agent_name) {
            return Err(Error::AgentNotFound(agent_name.to_string()));
        }

        let path = self.dir.join(format!("{}.json", agent_name));
        if !path.exists() {
            return Err(Error::AgentNotFound(agent_name.to_string()));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&content).map_err(|e| {
            Error::InvalidInput(format!(
                "Agent blueprint '{}' is not valid JSON: {}",
                agent_name, e
            ))
        })
    }

    /// List every readable blueprint as name + description.
    pub async fn list(&self) -> Result<Vec<AgentSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut agents = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Failed to read blueprint {}: {}", path.display(), e);
                    continue;
                }
            };
            let blueprint: Value = match serde_json::from_str(&content) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Skipping malformed blueprint {}: {}", path.display(), e);
                    continue;
                }
            };

            agents.push(AgentSummary {
                name: name.to_string(),
                description: blueprint
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from),
            });
        }

        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }
}
