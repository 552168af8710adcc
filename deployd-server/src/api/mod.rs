//! Deployment API handlers.
//!
//! # Endpoints
//!
//! - `POST /deploy`               – start a deployment
//! - `GET  /deploy/{id}/status`   – lifecycle snapshot
//! - `GET  /deploy/{id}/logs`     – live log stream (server-sent events)

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use deployd_core::deployer::DeployError;
use deployd_sdk::objects::ErrorResponse;

use crate::state::AppState;

mod deploy;
mod logs;
mod status;

/// Build the deployment API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/deploy", post(deploy::start_deployment))
        .route("/deploy/{id}/status", get(status::deployment_status))
        .route("/deploy/{id}/logs", get(logs::deployment_logs))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Errors that can occur in API handlers.
#[derive(Debug)]
enum ApiError {
    /// The body was not a valid deployment request, or failed validation.
    InvalidRequest(String),
    /// No deployment with the given id.
    NotFound,
    Internal(String),
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::Validation(e) => ApiError::InvalidRequest(e.to_string()),
            DeployError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidRequest(reason) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid request: {reason}"),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Deployment not found".to_owned()),
            ApiError::Internal(reason) => {
                tracing::error!(error = %reason, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}
