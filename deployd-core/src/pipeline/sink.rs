use crate::broadcast::Broadcaster;
use crate::deployment::DeploymentId;
use deployd_sdk::objects::{LogEvent, LogLevel};
use std::sync::Arc;

/// Publishes events for one deployment under one step tag.
///
/// Every event is also mirrored to `tracing` at the matching level, so the
/// server log carries the full pipeline output even when nobody watches.
#[derive(Clone)]
pub struct EventSink {
    broadcaster: Broadcaster,
    deployment_id: DeploymentId,
    step: Arc<str>,
}

impl EventSink {
    pub fn new(broadcaster: Broadcaster, deployment_id: DeploymentId, step: &str) -> Self {
        Self {
            broadcaster,
            deployment_id,
            step: Arc::from(step),
        }
    }

    /// A sink for the same deployment under another step tag.
    pub fn for_step(&self, step: &str) -> Self {
        Self {
            broadcaster: self.broadcaster.clone(),
            deployment_id: self.deployment_id.clone(),
            step: Arc::from(step),
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn emit(&self, level: LogLevel, message: impl Into<String>) {
        let event = LogEvent::new(level, message, &*self.step);
        let id = &self.deployment_id;
        let step = &*self.step;
        match level {
            LogLevel::Error => tracing::error!(deployment_id = %id, step, "{}", event.message),
            LogLevel::Warn => tracing::warn!(deployment_id = %id, step, "{}", event.message),
            LogLevel::Debug => tracing::debug!(deployment_id = %id, step, "{}", event.message),
            _ => tracing::info!(deployment_id = %id, step, "{}", event.message),
        }
        self.broadcaster.publish(id, event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(LogLevel::Success, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(LogLevel::Debug, message);
    }
}
