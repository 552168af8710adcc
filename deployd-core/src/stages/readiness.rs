//! Stage that gives freshly provisioned infrastructure time to boot.
//!
//! Waits a fixed duration, then optionally probes a TCP address once. A
//! failed probe is reported as a warning; the stage still succeeds.

use crate::config::ReadinessPlan;
use crate::pipeline::{EventSink, Stage, StageContext, StageOutcome};
use async_trait::async_trait;
use tokio::net::TcpStream;

pub struct ReadinessStage {
    plan: ReadinessPlan,
}

impl ReadinessStage {
    pub fn new(plan: ReadinessPlan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Stage for ReadinessStage {
    fn name(&self) -> &str {
        &self.plan.name
    }

    async fn run(&self, ctx: &StageContext, sink: &EventSink) -> StageOutcome {
        if !self.plan.wait.is_zero() {
            sink.info(format!(
                "Waiting {}s for the instance to be ready...",
                self.plan.wait.as_secs()
            ));
            tokio::time::sleep(self.plan.wait).await;
        }

        let Some(address) = &self.plan.address else {
            sink.success("Instance should be ready");
            return StageOutcome::Success;
        };
        let address = match ctx.expand(address) {
            Ok(address) => address,
            Err(e) => {
                sink.warn(format!("Skipping readiness probe, invalid address template: {e}"));
                return StageOutcome::Success;
            }
        };

        match tokio::time::timeout(self.plan.probe_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => sink.success(format!("{address} is accepting connections")),
            Ok(Err(e)) => sink.warn(format!("Readiness probe of {address} failed: {e}, continuing")),
            Err(_) => sink.warn(format!(
                "Readiness probe of {address} timed out after {}s, continuing",
                self.plan.probe_timeout.as_secs()
            )),
        }
        StageOutcome::Success
    }
}
