//! Agent blueprint handling: placeholder resolution and config validation
//!
//! Blueprints are free-form JSON documents with conventional `name`,
//! `description`, `prompt`, `config`, `config_schema` and `mcp_servers`
//! members. Values anywhere in the document may contain `${source.key}`
//! placeholder tokens.

mod placeholder;
mod validate;

pub use placeholder::{
    resolve, resolve_runner_tokens, PlaceholderContext, PlaceholderSource, Resolution,
    RuntimeContext,
};
pub use validate::validate_required_config;
