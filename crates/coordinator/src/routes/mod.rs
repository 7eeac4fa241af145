//! HTTP route modules

pub mod agents;
pub mod health;
pub mod runner;
pub mod runs;
pub mod sessions;

use axum::http::StatusCode;
use axum::Json;

use ao_core::api::ErrorResponse;
use ao_core::Error;

pub(crate) type RouteError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn route_error(status: StatusCode, error: impl Into<String>) -> RouteError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

pub(crate) fn unauthorized(error: impl Into<String>) -> RouteError {
    route_error(StatusCode::UNAUTHORIZED, error)
}

pub(crate) fn forbidden(error: impl Into<String>) -> RouteError {
    route_error(StatusCode::FORBIDDEN, error)
}

/// Map a core error onto the status code it implies.
pub(crate) fn core_error(error: Error) -> RouteError {
    let status = match &error {
        Error::RunNotFound(_)
        | Error::SessionNotFound(_)
        | Error::RunnerNotFound(_)
        | Error::AgentNotFound(_) => StatusCode::NOT_FOUND,
        Error::SessionBusy(_) => StatusCode::CONFLICT,
        Error::InvalidInput(_) | Error::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    route_error(status, error.to_string())
}
