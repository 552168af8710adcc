use super::{EventSink, StageContext};
use async_trait::async_trait;

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    /// Reported as a warning; the pipeline continues.
    SoftFailure(String),
    /// Reported as an error; remaining stages are skipped.
    HardFailure(String),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }
}

/// One unit of deployment work.
///
/// Stages report progress only through `sink`, which tags every event with
/// the stage name. A stage never publishes the sentinel and never touches
/// the status store; the runner owns both.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Step tag used for this stage's events.
    fn name(&self) -> &str;

    async fn run(&self, ctx: &StageContext, sink: &EventSink) -> StageOutcome;
}
