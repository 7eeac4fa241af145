//! Placeholder resolution for agent blueprints
//!
//! Blueprints may embed `${source.key}` tokens anywhere in their string
//! values. Resolution is a pure, non-mutating transform: the context is a
//! snapshot (including the environment), and anything that cannot be
//! resolved is left verbatim rather than erroring. The `runner` source is
//! special: the coordinator never touches it, the runner substitutes it
//! just before spawning the executor.

use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// The places a placeholder token may draw its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderSource {
    /// Run parameters (LLM-visible)
    Params,
    /// Run scope (LLM-invisible)
    Scope,
    /// Environment snapshot taken when the context was built
    Env,
    /// Run-level facts: `run_id`, `session_id`
    Runtime,
    /// Runner-local facts, resolved only on the runner
    Runner,
}

impl PlaceholderSource {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "params" => Some(PlaceholderSource::Params),
            "scope" => Some(PlaceholderSource::Scope),
            "env" => Some(PlaceholderSource::Env),
            "runtime" => Some(PlaceholderSource::Runtime),
            "runner" => Some(PlaceholderSource::Runner),
            _ => None,
        }
    }
}

/// Outcome of a single token lookup. `Passthrough` means the token text
/// stays in place untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Value),
    Passthrough,
}

/// Identifiers of the run being resolved.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeContext {
    pub run_id: Uuid,
    pub session_id: Uuid,
}

/// Everything a coordinator-side resolution can see.
///
/// Built per enqueue and discarded afterwards. The environment is captured
/// once at construction so repeated resolution of the same context is
/// deterministic.
pub struct PlaceholderContext {
    pub params: Map<String, Value>,
    pub scope: Map<String, Value>,
    pub env: HashMap<String, String>,
    pub runtime: RuntimeContext,
}

impl PlaceholderContext {
    pub fn new(params: Map<String, Value>, scope: Map<String, Value>, runtime: RuntimeContext) -> Self {
        Self {
            params,
            scope,
            env: std::env::vars().collect(),
            runtime,
        }
    }

    /// Replace the environment snapshot (tests, or callers that restrict
    /// what the resolver may see).
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Look up one `source.key` pair.
    pub fn lookup(&self, source: PlaceholderSource, key: &str) -> Resolution {
        match source {
            PlaceholderSource::Params => match self.params.get(key) {
                Some(value) => Resolution::Resolved(value.clone()),
                None => Resolution::Passthrough,
            },
            PlaceholderSource::Scope => match self.scope.get(key) {
                Some(value) => Resolution::Resolved(value.clone()),
                None => Resolution::Passthrough,
            },
            PlaceholderSource::Env => match self.env.get(key) {
                Some(value) => Resolution::Resolved(Value::String(value.clone())),
                None => Resolution::Passthrough,
            },
            PlaceholderSource::Runtime => match key {
                "run_id" => Resolution::Resolved(Value::String(self.runtime.run_id.to_string())),
                "session_id" => {
                    Resolution::Resolved(Value::String(self.runtime.session_id.to_string()))
                }
                _ => Resolution::Passthrough,
            },
            // Deferred to the runner.
            PlaceholderSource::Runner => Resolution::Passthrough,
        }
    }
}

/// Resolve every placeholder the coordinator-side context can see.
/// `${runner.*}` tokens come back byte-for-byte unchanged.
pub fn resolve(value: &Value, ctx: &PlaceholderContext) -> Value {
    resolve_with(value, &|source, key| ctx.lookup(source, key))
}

/// The runner-side second pass: substitute `${runner.*}` tokens from the
/// given value map and leave every other token alone.
pub fn resolve_runner_tokens(value: &Value, runner: &Map<String, Value>) -> Value {
    resolve_with(value, &|source, key| match source {
        PlaceholderSource::Runner => match runner.get(key) {
            Some(v) => Resolution::Resolved(v.clone()),
            None => Resolution::Passthrough,
        },
        _ => Resolution::Passthrough,
    })
}

fn resolve_with(value: &Value, lookup: &dyn Fn(PlaceholderSource, &str) -> Resolution) -> Value {
    match value {
        Value::String(s) => resolve_string(s, lookup),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_with(v, lookup)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_with(v, lookup)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, lookup: &dyn Fn(PlaceholderSource, &str) -> Resolution) -> Value {
    // A string that is exactly one token keeps the resolved value's JSON
    // type; everything else is textual substitution.
    if let Some(token) = as_single_token(s) {
        return match resolve_token(token, lookup) {
            Resolution::Resolved(value) => value,
            Resolution::Passthrough => Value::String(s.to_string()),
        };
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated token: copy the remainder as-is.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let token = &after[..end];
        match resolve_token(token, lookup) {
            Resolution::Resolved(value) => match scalar_text(&value) {
                Some(text) => out.push_str(&text),
                // Objects and arrays don't splice into strings.
                None => {
                    out.push_str("${");
                    out.push_str(token);
                    out.push('}');
                }
            },
            Resolution::Passthrough => {
                out.push_str("${");
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Value::String(out)
}

fn resolve_token(token: &str, lookup: &dyn Fn(PlaceholderSource, &str) -> Resolution) -> Resolution {
    let Some((source_name, key)) = token.split_once('.') else {
        return Resolution::Passthrough;
    };
    match PlaceholderSource::parse(source_name) {
        Some(source) => lookup(source, key),
        None => Resolution::Passthrough,
    }
}

fn as_single_token(s: &str) -> Option<&str> {
    let content = s.strip_prefix("${")?.strip_suffix('}')?;
    if content.contains('}') || content.contains("${") {
        return None;
    }
    Some(content)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
