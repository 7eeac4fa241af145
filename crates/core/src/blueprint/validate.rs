//! Required-config validation
//!
//! The resolver never errors on a missing value, so a declared-required key
//! that nobody supplied would otherwise sail through as a literal
//! `${scope.whatever}` string. This pass runs after resolution and fails
//! the enqueue instead. `${runner.*}` tokens are legitimate leftovers and
//! are exempt.

use serde_json::Value;

use crate::{Error, Result};

/// Check `config_schema.required` against the resolved blueprint's `config`
/// object. Blueprints without a schema pass trivially.
pub fn validate_required_config(blueprint: &Value) -> Result<()> {
    let Some(required) = blueprint
        .pointer("/config_schema/required")
        .and_then(Value::as_array)
    else {
        return Ok(());
    };

    let config = blueprint.get("config").and_then(Value::as_object);

    for key in required.iter().filter_map(Value::as_str) {
        let value = config.and_then(|c| c.get(key));
        match value {
            None => {
                return Err(Error::InvalidInput(format!(
                    "Required config key '{}' is missing",
                    key
                )));
            }
            Some(v) => {
                if let Some(token) = find_non_runner_token(v) {
                    return Err(Error::InvalidInput(format!(
                        "Required config key '{}' has no value: {} did not resolve",
                        key, token
                    )));
                }
            }
        }
    }

    Ok(())
}

fn find_non_runner_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => find_non_runner_token_in_str(s),
        Value::Array(items) => items.iter().find_map(find_non_runner_token),
        Value::Object(map) => map.values().find_map(find_non_runner_token),
        _ => None,
    }
}

fn find_non_runner_token_in_str(s: &str) -> Option<String> {
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let end = after.find('}')?;
        let token = &after[..end];
        let is_runner = token
            .split_once('.')
            .map(|(source, _)| source == "runner")
            .unwrap_or(false);
        if !is_runner {
            return Some(format!("${{{}}}", token));
        }
        rest = &after[end + 1..];
    }
    None
}
