//! Request and response bodies of the deployment endpoints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// Body of `POST /deploy`.
///
/// The orchestrator only validates the identifying fields; everything else
/// is carried opaquely to the pipeline stages.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub repo_url: String,
    pub username: String,
    pub github_token: String,
    #[serde(default)]
    pub req_path: String,
    #[serde(default)]
    pub manage_path: String,
    #[serde(default)]
    pub additional_commands: Vec<String>,
    #[serde(default)]
    pub env_variables: BTreeMap<String, String>,
    /// Serve the application through an ASGI worker.
    #[serde(default)]
    pub asgi: bool,
    /// Publish push-to-deploy credentials to the repository.
    #[serde(default)]
    pub auto_deploy: bool,
}

// The token must never reach logs.
impl fmt::Debug for DeploymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentRequest")
            .field("repo_url", &self.repo_url)
            .field("username", &self.username)
            .field("github_token", &"<redacted>")
            .field("req_path", &self.req_path)
            .field("manage_path", &self.manage_path)
            .field("additional_commands", &self.additional_commands)
            .field("env_variables", &self.env_variables.keys().collect::<Vec<_>>())
            .field("asgi", &self.asgi)
            .field("auto_deploy", &self.auto_deploy)
            .finish()
    }
}

/// Successful response of `POST /deploy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployAccepted {
    pub success: bool,
    pub message: String,
    pub deployment_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Lifecycle state of a deployment.
///
/// `Running` is the initial state; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Running,
    Completed,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Completed | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Running => "running",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of `GET /deploy/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<OffsetDateTime>,
    /// Wall-clock duration in seconds, present once terminal.
    #[serde(rename = "duration", default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}
