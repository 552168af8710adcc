use super::{EventSink, Stage, StageContext, StageOutcome, Workspace};
use crate::broadcast::Broadcaster;
use crate::config::DEFAULT_RETIRE_GRACE;
use crate::deployment::DeploymentId;
use crate::status::DeploymentStatusStore;
use deployd_sdk::objects::{DeploymentRequest, DeploymentStatus, LogEvent};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

const INITIALIZATION_STEP: &str = "initialization";
const CLEANUP_STEP: &str = "cleanup";
const COMPLETED_STEP: &str = "completed";
const ERROR_STEP: &str = "error";

/// What a finished pipeline run amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: DeploymentStatus,
    /// Reason of the hard failure, if any.
    pub error: Option<String>,
    /// Number of stages that were started.
    pub stages_run: usize,
}

/// Drives one deployment attempt from start to retirement.
///
/// The runner is the only producer of events for its deployment and the
/// only writer of its record after creation.
pub struct PipelineRunner {
    store: DeploymentStatusStore,
    broadcaster: Broadcaster,
    workspace_root: PathBuf,
    stages: Vec<Arc<dyn Stage>>,
    retire_grace: Duration,
}

impl PipelineRunner {
    pub fn new(
        store: DeploymentStatusStore,
        broadcaster: Broadcaster,
        workspace_root: impl Into<PathBuf>,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            workspace_root: workspace_root.into(),
            stages,
            retire_grace: DEFAULT_RETIRE_GRACE,
        }
    }

    /// Time between publishing the sentinel and retiring the registry
    /// entry, so attached sessions can drain.
    pub fn with_retire_grace(mut self, grace: Duration) -> Self {
        self.retire_grace = grace;
        self
    }

    /// Run every stage, clean up, record the outcome, publish the sentinel
    /// and retire the registry entry.
    ///
    /// The record for `id` must already exist and the registry entry must
    /// be open.
    #[instrument(skip_all, fields(deployment_id = %id))]
    pub async fn run(self, id: DeploymentId, request: Arc<DeploymentRequest>) -> RunSummary {
        let sink = EventSink::new(self.broadcaster.clone(), id.clone(), INITIALIZATION_STEP);
        sink.info("Starting deployment...");

        let (failure, stages_run) = match Workspace::acquire(&self.workspace_root, &id).await {
            Ok(workspace) => {
                let ctx = StageContext::new(id.clone(), workspace.path().to_path_buf(), request);
                let result = self.run_stages(&ctx, &sink).await;
                Self::cleanup(workspace, &sink.for_step(CLEANUP_STEP)).await;
                result
            }
            Err(e) => {
                let reason = e.to_string();
                sink.error(reason.clone());
                (Some(reason), 0)
            }
        };

        let status = match failure {
            None => DeploymentStatus::Completed,
            Some(_) => DeploymentStatus::Failed,
        };
        if let Err(e) = self.store.transition(&id, status, failure.clone()) {
            error!(error = %e, "Failed to record deployment outcome");
        }

        match &failure {
            None => sink
                .for_step(COMPLETED_STEP)
                .success("Deployment completed successfully!"),
            Some(reason) => sink
                .for_step(ERROR_STEP)
                .error(format!("Deployment failed: {reason}")),
        }

        self.broadcaster.publish(&id, LogEvent::sentinel());
        info!(%status, stages_run, "Deployment finished");

        tokio::time::sleep(self.retire_grace).await;
        self.broadcaster.retire(&id);

        RunSummary {
            status,
            error: failure,
            stages_run,
        }
    }

    /// Returns the hard-failure reason, if any, and the number of stages
    /// started.
    async fn run_stages(&self, ctx: &StageContext, sink: &EventSink) -> (Option<String>, usize) {
        let mut started = 0;
        for stage in &self.stages {
            started += 1;
            let stage_sink = sink.for_step(stage.name());
            let outcome = AssertUnwindSafe(stage.run(ctx, &stage_sink))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    StageOutcome::HardFailure(format!(
                        "stage {} panicked: {}",
                        stage.name(),
                        panic_message(payload.as_ref())
                    ))
                });

            match outcome {
                StageOutcome::Success => {}
                StageOutcome::SoftFailure(reason) => stage_sink.warn(reason),
                StageOutcome::HardFailure(reason) => {
                    stage_sink.error(reason.clone());
                    return (Some(reason), started);
                }
            }
        }
        (None, started)
    }

    async fn cleanup(workspace: Workspace, sink: &EventSink) {
        sink.info("Cleaning up workspace...");
        let path = workspace.path().display().to_string();
        match workspace.release().await {
            Ok(()) => sink.success(format!("Workspace {path} removed")),
            Err(e) => sink.warn(format!("Failed to remove workspace {path}: {e}")),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{PanickingStage, ScriptedStage, drain, open_deployment, request};
    use deployd_sdk::objects::LogLevel;

    fn runner(
        store: &DeploymentStatusStore,
        broadcaster: &Broadcaster,
        root: &std::path::Path,
        stages: Vec<Arc<dyn Stage>>,
    ) -> PipelineRunner {
        PipelineRunner::new(store.clone(), broadcaster.clone(), root, stages)
            .with_retire_grace(Duration::from_millis(10))
    }

    fn steps(events: &[LogEvent]) -> Vec<(&str, LogLevel)> {
        events.iter().map(|e| (e.step.as_str(), e.level)).collect()
    }

    #[tokio::test]
    async fn test_zero_stage_pipeline_completes() {
        let (store, broadcaster, id) = open_deployment(64);
        let root = tempfile::tempdir().unwrap();
        let mut sub = broadcaster.subscribe(&id).unwrap();

        let summary = runner(&store, &broadcaster, root.path(), Vec::new())
            .run(id.clone(), Arc::new(request()))
            .await;

        assert_eq!(summary.status, DeploymentStatus::Completed);
        assert_eq!(summary.stages_run, 0);
        let record = store.get(id.as_str()).unwrap();
        assert_eq!(record.status, DeploymentStatus::Completed);
        assert!(record.end_time.is_some());
        assert!(!broadcaster.is_open(&id));

        let events = drain(&mut sub);
        assert_eq!(events[0].message, "Starting deployment...");
        let last = events.last().unwrap();
        assert!(last.is_sentinel());
        assert_eq!(events.iter().filter(|e| e.is_sentinel()).count(), 1);
        assert!(
            events
                .iter()
                .any(|e| e.step == "completed" && e.level == LogLevel::Success)
        );
    }

    #[tokio::test]
    async fn test_hard_failure_aborts_and_cleans_up() {
        let (store, broadcaster, id) = open_deployment(64);
        let root = tempfile::tempdir().unwrap();
        let mut sub = broadcaster.subscribe(&id).unwrap();

        let third = Arc::new(ScriptedStage::success("deploy"));
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ScriptedStage::success("provision").with_events(&["applying"])),
            Arc::new(ScriptedStage::new(
                "configure",
                StageOutcome::HardFailure("disk full".into()),
            )),
            third.clone(),
        ];

        let summary = runner(&store, &broadcaster, root.path(), stages)
            .run(id.clone(), Arc::new(request()))
            .await;

        assert_eq!(summary.status, DeploymentStatus::Failed);
        assert_eq!(summary.stages_run, 2);
        assert_eq!(third.runs(), 0);

        let record = store.get(id.as_str()).unwrap();
        assert_eq!(record.status, DeploymentStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("disk full"));

        let events = drain(&mut sub);
        let steps = steps(&events);
        let configure_error = steps
            .iter()
            .position(|s| *s == ("configure", LogLevel::Error))
            .unwrap();
        let cleanup = steps.iter().position(|s| s.0 == "cleanup").unwrap();
        let summary_error = steps
            .iter()
            .position(|s| *s == ("error", LogLevel::Error))
            .unwrap();
        assert!(configure_error < cleanup);
        assert!(cleanup < summary_error);
        assert!(!steps.iter().any(|s| s.0 == "deploy"));
        assert_eq!(events[summary_error].message, "Deployment failed: disk full");
        assert!(events.last().unwrap().is_sentinel());

        // Workspace is gone.
        assert!(!root.path().join(id.as_str()).exists());
    }

    #[tokio::test]
    async fn test_soft_failure_continues() {
        let (store, broadcaster, id) = open_deployment(64);
        let root = tempfile::tempdir().unwrap();
        let mut sub = broadcaster.subscribe(&id).unwrap();

        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ScriptedStage::new(
                "lint",
                StageOutcome::SoftFailure("warnings found".into()),
            )),
            Arc::new(ScriptedStage::success("deploy").with_events(&["done"])),
        ];
        let summary = runner(&store, &broadcaster, root.path(), stages)
            .run(id.clone(), Arc::new(request()))
            .await;

        assert_eq!(summary.status, DeploymentStatus::Completed);
        assert_eq!(summary.stages_run, 2);
        let events = drain(&mut sub);
        assert!(
            events
                .iter()
                .any(|e| e.step == "lint" && e.level == LogLevel::Warn && e.message == "warnings found")
        );
        assert!(events.iter().any(|e| e.step == "deploy" && e.message == "done"));
    }

    #[tokio::test]
    async fn test_panicking_stage_becomes_hard_failure() {
        let (store, broadcaster, id) = open_deployment(64);
        let root = tempfile::tempdir().unwrap();

        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(PanickingStage)];
        let summary = runner(&store, &broadcaster, root.path(), stages)
            .run(id.clone(), Arc::new(request()))
            .await;

        assert_eq!(summary.status, DeploymentStatus::Failed);
        let error = summary.error.unwrap();
        assert!(error.contains("panicked"), "{error}");
        assert!(!root.path().join(id.as_str()).exists());
    }

    #[tokio::test]
    async fn test_workspace_failure_still_publishes_sentinel() {
        let (store, broadcaster, id) = open_deployment(64);
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let mut sub = broadcaster.subscribe(&id).unwrap();

        let stage = Arc::new(ScriptedStage::success("never"));
        let summary = runner(&store, &broadcaster, &blocker, vec![stage.clone()])
            .run(id.clone(), Arc::new(request()))
            .await;

        assert_eq!(summary.status, DeploymentStatus::Failed);
        assert_eq!(summary.stages_run, 0);
        assert_eq!(stage.runs(), 0);
        let events = drain(&mut sub);
        assert!(events.last().unwrap().is_sentinel());
        assert!(events.iter().any(|e| e.level == LogLevel::Error));
    }

    #[tokio::test]
    async fn test_outputs_flow_between_stages() {
        let (store, broadcaster, id) = open_deployment(64);
        let root = tempfile::tempdir().unwrap();

        let reader = Arc::new(ScriptedStage::success("reader").reading("public_ip"));
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ScriptedStage::success("writer").writing("public_ip", "10.0.0.7")),
            reader.clone(),
        ];
        runner(&store, &broadcaster, root.path(), stages)
            .run(id, Arc::new(request()))
            .await;

        assert_eq!(reader.seen().as_deref(), Some("10.0.0.7"));
    }
}
