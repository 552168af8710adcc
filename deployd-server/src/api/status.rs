use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use super::ApiError;
use crate::state::AppState;

/// `GET /deploy/{id}/status`: lifecycle snapshot of one deployment.
pub(super) async fn deployment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.store.get(&id).map_err(|_| ApiError::NotFound)?;
    Ok(Json(record.to_response()))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{app, body_json, get, state};
    use axum::http::StatusCode;
    use deployd_core::deployment::DeploymentId;
    use deployd_sdk::objects::DeploymentStatus;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_status_unknown() {
        let root = tempfile::tempdir().unwrap();
        let response = app(&state(root.path()))
            .oneshot(get("/deploy/ghost/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Deployment not found");
    }

    #[tokio::test]
    async fn test_status_running_then_failed() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());
        let id = DeploymentId::from("dep-status");
        state.store.create(id.clone()).unwrap();

        let response = app(&state)
            .oneshot(get("/deploy/dep-status/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "running");
        assert!(body.get("end_time").is_none());

        state
            .store
            .transition(&id, DeploymentStatus::Failed, Some("disk full".into()))
            .unwrap();
        let body = body_json(
            app(&state)
                .oneshot(get("/deploy/dep-status/status"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["deployment_id"], "dep-status");
        assert_eq!(body["status"], "failed");
        assert_eq!(body["error"], "disk full");
        assert!(body["end_time"].is_string());
        assert!(body["duration"].is_number());
    }
}
