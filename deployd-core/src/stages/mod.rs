//! Built-in stage kinds.

mod command;
mod readiness;

pub use command::{CommandStage, classify_stderr, classify_stdout};
pub use readiness::ReadinessStage;

use crate::config::StagePlan;
use crate::pipeline::Stage;
use std::sync::Arc;

/// Instantiate the stages of a pipeline plan, in order.
pub fn build_stages(plans: &[StagePlan]) -> Vec<Arc<dyn Stage>> {
    plans
        .iter()
        .map(|plan| -> Arc<dyn Stage> {
            match plan {
                StagePlan::Command(plan) => Arc::new(CommandStage::new(plan.clone())),
                StagePlan::Readiness(plan) => Arc::new(ReadinessStage::new(plan.clone())),
            }
        })
        .collect()
}
