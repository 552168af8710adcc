//! Entry point that turns a deployment request into a running pipeline.

use crate::broadcast::Broadcaster;
use crate::config::{ConfigStore, PipelineConfig};
use crate::deployment::{DeploymentId, RepoCoordinates};
use crate::pipeline::{PipelineRunner, RunSummary, Stage};
use crate::stages::build_stages;
use crate::status::{DeploymentStatusStore, StoreError};
use deployd_sdk::objects::DeploymentRequest;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

/// A request that cannot start a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("repo_url must be a repository URL like https://github.com/owner/repo")]
    InvalidRepoUrl,
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Check the fields every pipeline relies on.
pub fn validate(request: &DeploymentRequest) -> Result<(), ValidationError> {
    let required = [
        ("username", &request.username),
        ("repo_url", &request.repo_url),
        ("github_token", &request.github_token),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field));
        }
    }
    RepoCoordinates::parse(&request.repo_url).ok_or(ValidationError::InvalidRepoUrl)?;
    Ok(())
}

/// A started deployment.
pub struct DeploymentHandle {
    pub id: DeploymentId,
    /// Resolves after the registry entry has been retired.
    pub task: JoinHandle<RunSummary>,
}

/// Creates deployments and spawns their pipelines.
#[derive(Clone)]
pub struct Deployer {
    store: DeploymentStatusStore,
    broadcaster: Broadcaster,
    pipeline: ConfigStore<PipelineConfig>,
}

impl Deployer {
    pub fn new(
        store: DeploymentStatusStore,
        broadcaster: Broadcaster,
        pipeline: ConfigStore<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            pipeline,
        }
    }

    /// Validate `request`, register the deployment and run the currently
    /// configured pipeline in the background.
    pub async fn start(&self, request: DeploymentRequest) -> Result<DeploymentHandle, DeployError> {
        validate(&request)?;
        let plan = self.pipeline.snapshot().await;
        let stages = build_stages(&plan.stages);
        self.start_with_stages(request, &plan, stages)
    }

    /// Like [`start`](Deployer::start), with an explicit stage list.
    pub fn start_with_stages(
        &self,
        request: DeploymentRequest,
        plan: &PipelineConfig,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Result<DeploymentHandle, DeployError> {
        validate(&request)?;

        let id = DeploymentId::generate();
        self.store.create(id.clone())?;
        self.broadcaster.open(&id);
        info!(
            deployment_id = %id,
            repo_url = %request.repo_url,
            username = %request.username,
            stages = stages.len(),
            "Deployment started"
        );

        let runner = PipelineRunner::new(
            self.store.clone(),
            self.broadcaster.clone(),
            plan.workspace_root.clone(),
            stages,
        )
        .with_retire_grace(plan.retire_grace);
        let task = tokio::spawn(runner.run(id.clone(), Arc::new(request)));

        Ok(DeploymentHandle { id, task })
    }

    pub fn store(&self) -> &DeploymentStatusStore {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn pipeline(&self) -> &ConfigStore<PipelineConfig> {
        &self.pipeline
    }
}
