//! Stream session settings.

use crate::broadcast::DEFAULT_SUBSCRIBER_BUFFER;
use std::time::Duration;

/// Settings applied to every log stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Capacity of each subscriber queue in the broadcaster.
    pub subscriber_buffer: usize,
    /// Capacity of the session-to-transport channel.
    pub transport_buffer: usize,
    pub heartbeat_interval: Duration,
    /// Session closes after this long without a forwarded event.
    /// Heartbeats do not count.
    pub idle_timeout: Duration,
    /// Hard cap on session length, if any.
    pub max_session: Option<Duration>,
    /// Delay between forwarding the sentinel and closing the stream.
    pub close_delay: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            transport_buffer: 16,
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_session: None,
            close_delay: Duration::from_secs(1),
        }
    }
}
