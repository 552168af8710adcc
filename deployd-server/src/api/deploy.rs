use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};
use deployd_sdk::objects::{DeployAccepted, DeploymentRequest};
use time::OffsetDateTime;

use super::ApiError;
use crate::state::AppState;

/// `POST /deploy`: validate the request and start the pipeline.
///
/// Returns as soon as the deployment is registered; progress is observed
/// through the logs and status endpoints.
pub(super) async fn start_deployment(
    State(state): State<AppState>,
    body: Result<Json<DeploymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let handle = state.deployer.start(request).await?;

    Ok(Json(DeployAccepted {
        success: true,
        message: "Deployment started".to_owned(),
        deployment_id: handle.id.to_string(),
        timestamp: OffsetDateTime::now_utc(),
    }))
}
