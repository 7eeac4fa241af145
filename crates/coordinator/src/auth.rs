//! Runner authentication
//!
//! The coordinator issues a runner-scoped JWT at registration. Every
//! runner-facing route requires it as a bearer token; the executor
//! subprocess never sees it (the runner's gateway injects it).

use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

const RUNNER_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerClaims {
    /// The runner id this token was issued to.
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

fn jwt_secret() -> String {
    std::env::var("AGENT_ORCHESTRATOR_JWT_SECRET")
        .unwrap_or_else(|_| "dev-jwt-secret-change-me".to_string())
}

fn runner_validation() -> Validation {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation
}

pub fn issue_runner_jwt(runner_id: &str) -> Result<String, String> {
    let exp = (Utc::now() + Duration::hours(RUNNER_TOKEN_TTL_HOURS)).timestamp() as usize;
    let claims = RunnerClaims {
        sub: runner_id.to_string(),
        role: "runner".to_string(),
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret().as_bytes()),
    )
    .map_err(|err| format!("Failed to sign runner JWT: {}", err))
}

pub fn verify_runner_jwt(token: &str) -> Result<RunnerClaims, String> {
    decode::<RunnerClaims>(
        token,
        &DecodingKey::from_secret(jwt_secret().as_bytes()),
        &runner_validation(),
    )
    .map(|decoded| decoded.claims)
    .map_err(|err| format!("Invalid runner JWT: {}", err))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Authenticate a runner request from its Authorization header.
pub fn authenticate_runner(headers: &HeaderMap) -> Result<RunnerClaims, String> {
    let token =
        extract_bearer_token(headers).ok_or_else(|| "Missing bearer token".to_string())?;
    verify_runner_jwt(token)
}
