//! HTTP client for the deployd API.
//!
//! Gated behind the `client` cargo feature so crates that only need the
//! shared types do not pull in `reqwest`.

use futures_util::{Stream, StreamExt, stream};
use reqwest::{Client, StatusCode};
use reqwest_eventsource::{CannotCloneRequestError, Event, EventSource};
use url::Url;

use crate::objects::{DeployAccepted, DeploymentRequest, LogEvent, StatusResponse};

/// Errors produced by [`DeploydClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The log stream failed after it was opened.
    #[error("event stream error: {0}")]
    EventSource(#[from] reqwest_eventsource::Error),

    /// The log request could not be prepared for streaming.
    #[error("event stream request: {0}")]
    StreamRequest(#[from] CannotCloneRequestError),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Typed HTTP client for a deployd server.
#[derive(Debug, Clone)]
pub struct DeploydClient {
    http: Client,
    base_url: Url,
}

impl DeploydClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /deploy` – start a deployment.
    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<DeployAccepted, ClientError> {
        let url = self.base_url.join("/deploy")?;
        let resp = self.http.post(url).json(request).send().await?;
        parse_response(resp).await
    }

    /// `GET /deploy/{id}/status` – fetch the current deployment record.
    pub async fn status(&self, deployment_id: &str) -> Result<StatusResponse, ClientError> {
        let url = self
            .base_url
            .join(&format!("/deploy/{deployment_id}/status"))?;
        let resp = self.http.get(url).send().await?;
        parse_response(resp).await
    }

    /// `GET /deploy/{id}/logs` – follow the live event stream.
    ///
    /// Heartbeats are filtered out. The stream ends after the sentinel
    /// event or when the server closes the connection.
    pub async fn logs(
        &self,
        deployment_id: &str,
    ) -> Result<impl Stream<Item = Result<LogEvent, ClientError>> + use<>, ClientError> {
        let url = self
            .base_url
            .join(&format!("/deploy/{deployment_id}/logs"))?;
        let mut source = EventSource::new(self.http.get(url))?;

        // A refused stream (unknown id, server error) fails the call itself.
        let (first, ended) = match source.next().await {
            Some(Ok(Event::Open)) => (None, false),
            Some(Ok(Event::Message(msg))) => (Some(msg.data), false),
            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, resp))) => {
                source.close();
                let body = resp.text().await.unwrap_or_default();
                return Err(ClientError::Api { status, body });
            }
            Some(Err(e)) => {
                source.close();
                return Err(e.into());
            }
            None => (None, true),
        };

        Ok(stream::unfold(
            (source, first, ended),
            |(mut source, mut pending, done)| async move {
                if done {
                    return None;
                }
                loop {
                    let data = match pending.take() {
                        Some(data) => data,
                        None => match source.next().await {
                            Some(Ok(Event::Open)) => continue,
                            Some(Ok(Event::Message(msg))) => msg.data,
                            Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                                source.close();
                                return None;
                            }
                            Some(Err(e)) => {
                                source.close();
                                return Some((Err(e.into()), (source, None, true)));
                            }
                        },
                    };

                    let event = match serde_json::from_str::<LogEvent>(&data) {
                        Ok(event) => event,
                        Err(e) => return Some((Err(e.into()), (source, None, false))),
                    };
                    if event.is_heartbeat() {
                        continue;
                    }
                    let done = event.is_sentinel();
                    if done {
                        source.close();
                    }
                    return Some((Ok(event), (source, None, done)));
                }
            },
        ))
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}
