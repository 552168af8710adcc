//! Log events carried on the `GET /deploy/{id}/logs` stream.
//!
//! # Protocol
//!
//! Every SSE `data:` line holds one JSON [`LogEvent`]:
//!
//! ```json
//! {"level":"info","message":"Initializing Terraform...","step":"terraform","timestamp":"2025-01-01T12:00:00Z"}
//! ```
//!
//! Two `system` events are reserved and must not be rendered as pipeline
//! output:
//!
//! - `{"level":"system","message":"heartbeat"}` is sent on a fixed interval.
//! - `{"level":"system","message":"DEPLOYMENT_COMPLETE"}` is always the
//!   last event of a stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Message of the terminal sentinel event.
pub const SENTINEL_MESSAGE: &str = "DEPLOYMENT_COMPLETE";
/// Message of the keepalive event.
pub const HEARTBEAT_MESSAGE: &str = "heartbeat";
/// Step tag of the sentinel event.
pub const SYSTEM_STEP: &str = "system";
/// Step tag of the keepalive event.
pub const HEARTBEAT_STEP: &str = "heartbeat";
/// Step tag of the event sent right after a client attaches.
pub const CONNECTION_STEP: &str = "connection";

/// Severity of a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
    Debug,
    System,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
            LogLevel::System => "system",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress record emitted by a deployment.
///
/// Events are immutable once created; the broadcaster hands out clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    /// Free-form tag naming the stage that produced the event.
    #[serde(default)]
    pub step: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl LogEvent {
    /// Create an event stamped with the current UTC time.
    pub fn new(level: LogLevel, message: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            step: step.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// The reserved end-of-stream event.
    pub fn sentinel() -> Self {
        Self::new(LogLevel::System, SENTINEL_MESSAGE, SYSTEM_STEP)
    }

    /// The reserved keepalive event.
    pub fn heartbeat() -> Self {
        Self::new(LogLevel::System, HEARTBEAT_MESSAGE, HEARTBEAT_STEP)
    }

    /// The synthetic event a stream opens with.
    pub fn connected(deployment_id: &str, status: impl fmt::Display) -> Self {
        Self::new(
            LogLevel::System,
            format!("Connected to log stream for deployment {deployment_id} (status: {status})"),
            CONNECTION_STEP,
        )
    }

    pub fn is_sentinel(&self) -> bool {
        self.level == LogLevel::System && self.message == SENTINEL_MESSAGE
    }

    pub fn is_heartbeat(&self) -> bool {
        self.level == LogLevel::System && self.message == HEARTBEAT_MESSAGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let json = r#"{"level":"warn","message":"probe failed","step":"readiness","timestamp":"2025-03-01T10:20:30Z"}"#;
        let event: LogEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.level, LogLevel::Warn);
        assert_eq!(event.step, "readiness");
        assert_eq!(event.timestamp.unix_timestamp(), 1_740_824_430);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["level"], "warn");
        assert_eq!(value["timestamp"], "2025-03-01T10:20:30Z");
    }

    #[test]
    fn test_missing_step_defaults_to_empty() {
        let json = r#"{"level":"system","message":"DEPLOYMENT_COMPLETE","timestamp":"2025-03-01T10:20:30Z"}"#;
        let event: LogEvent = serde_json::from_str(json).unwrap();
        assert!(event.step.is_empty());
        assert!(event.is_sentinel());
    }

    #[test]
    fn test_reserved_events() {
        assert!(LogEvent::sentinel().is_sentinel());
        assert!(!LogEvent::sentinel().is_heartbeat());
        assert!(LogEvent::heartbeat().is_heartbeat());

        // Same message at a non-system level is ordinary pipeline output.
        let spoofed = LogEvent::new(LogLevel::Info, SENTINEL_MESSAGE, "build");
        assert!(!spoofed.is_sentinel());

        let connected = LogEvent::connected("abc", "running");
        assert_eq!(connected.step, CONNECTION_STEP);
        assert!(connected.message.contains("abc"));
        assert!(connected.message.contains("running"));
    }
}
