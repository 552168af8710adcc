use axum::{
    extract::{Path, State},
    http::{HeaderName, HeaderValue},
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
};
use deployd_core::session::StreamSession;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::ApiError;
use crate::state::AppState;

/// `GET /deploy/{id}/logs`: live log stream as server-sent events.
///
/// Each SSE `data:` field carries one JSON `LogEvent`. The session runs in
/// its own task and writes into a bounded channel that backs the response
/// body; when the client goes away the body, and with it the channel
/// receiver, is dropped, which ends the session.
pub(super) async fn deployment_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let streaming = state.streaming.as_ref().clone();
    let transport_buffer = streaming.transport_buffer;
    let session = StreamSession::attach(&state.broadcaster, &state.store, id.into(), streaming)
        .map_err(|_| ApiError::NotFound)?;
    tracing::debug!(deployment_id = %session.deployment_id(), "Log stream requested");

    let (tx, rx) = mpsc::channel(transport_buffer);
    tokio::spawn(session.run(tx));

    let events = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));
    Ok((
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(events),
    ))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{app, body_json, get, state};
    use axum::http::{StatusCode, header};
    use deployd_core::deployment::DeploymentId;
    use deployd_sdk::objects::{DeploymentStatus, LogEvent, LogLevel};
    use tower::ServiceExt;

    fn data_events(body: &str) -> Vec<LogEvent> {
        body.split("\n\n")
            .filter_map(|chunk| chunk.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_logs_unknown_deployment() {
        let root = tempfile::tempdir().unwrap();
        let response = app(&state(root.path()))
            .oneshot(get("/deploy/ghost/logs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Deployment not found");
    }

    #[tokio::test]
    async fn test_logs_of_finished_deployment() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());
        let id = DeploymentId::from("dep-done");
        state.store.create(id.clone()).unwrap();
        state
            .store
            .transition(&id, DeploymentStatus::Completed, None)
            .unwrap();

        let response = app(&state)
            .oneshot(get("/deploy/dep-done/logs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let events = data_events(std::str::from_utf8(&bytes).unwrap());
        assert_eq!(events.len(), 1);
        assert!(events[0].is_sentinel());
    }

    #[tokio::test]
    async fn test_logs_stream_live_events() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());
        let id = DeploymentId::from("dep-live");
        state.store.create(id.clone()).unwrap();
        state.broadcaster.open(&id);

        let response = app(&state)
            .oneshot(get("/deploy/dep-live/logs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.broadcaster.subscriber_count(&id), 1);

        state
            .broadcaster
            .publish(&id, LogEvent::new(LogLevel::Info, "terraform init", "terraform"));
        state
            .store
            .transition(&id, DeploymentStatus::Completed, None)
            .unwrap();
        state.broadcaster.publish(&id, LogEvent::sentinel());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let events = data_events(std::str::from_utf8(&bytes).unwrap());
        let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].starts_with("Connected to log stream for deployment dep-live"));
        assert_eq!(messages[1], "terraform init");
        assert!(events[2].is_sentinel());
        assert_eq!(state.broadcaster.subscriber_count(&id), 0);
    }
}
