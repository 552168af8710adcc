//! One client's view of a deployment's live log.
//!
//! A [`StreamSession`] attaches to a deployment, then forwards events from
//! its [`Subscriber`] to an [`EventTransport`] until the deployment
//! finishes, the client goes away, or the session times out.
//!
//! ```text
//! ATTACHING --terminal--> send sentinel -------------------> CLOSED
//!     |
//!     +--running--> send connected --> STREAMING --(any end)--> CLOSED
//! ```
//!
//! While streaming, the session waits on whichever comes first of: the
//! next event, a heartbeat tick, the idle deadline, the optional session
//! deadline, or the transport closing.

use crate::broadcast::{BroadcastError, Broadcaster, Subscriber};
use crate::config::StreamingConfig;
use crate::deployment::DeploymentId;
use crate::status::DeploymentStatusStore;
use deployd_sdk::objects::LogEvent;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("deployment {0} not found")]
    NotFound(DeploymentId),
}

impl From<BroadcastError> for SessionError {
    fn from(value: BroadcastError) -> Self {
        match value {
            BroadcastError::NotFound(id) => SessionError::NotFound(id),
        }
    }
}

/// The receiving side went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transport closed")]
pub struct TransportClosed;

/// Where a session writes its events.
pub trait EventTransport: Send {
    /// Deliver one event, waiting for room if the transport is full.
    fn send(&mut self, event: LogEvent) -> impl Future<Output = Result<(), TransportClosed>> + Send;

    /// Resolves once the receiving side is gone.
    fn closed(&self) -> impl Future<Output = ()> + Send;
}

impl EventTransport for mpsc::Sender<LogEvent> {
    fn send(&mut self, event: LogEvent) -> impl Future<Output = Result<(), TransportClosed>> + Send {
        let sending = mpsc::Sender::send(self, event);
        async move { sending.await.map_err(|_| TransportClosed) }
    }

    fn closed(&self) -> impl Future<Output = ()> + Send {
        mpsc::Sender::closed(self)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The sentinel was delivered.
    Completed,
    /// The registry entry went away before a sentinel arrived.
    Retired,
    IdleTimeout,
    MaxDuration,
    /// The client disconnected.
    Disconnected,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionEnd::Completed => "completed",
            SessionEnd::Retired => "retired",
            SessionEnd::IdleTimeout => "idle_timeout",
            SessionEnd::MaxDuration => "max_duration",
            SessionEnd::Disconnected => "disconnected",
        })
    }
}

pub struct StreamSession {
    deployment_id: DeploymentId,
    broadcaster: Broadcaster,
    opening: LogEvent,
    subscriber: Option<Subscriber>,
    config: StreamingConfig,
}

impl StreamSession {
    /// Resolve `id` and attach to its event stream.
    ///
    /// A finished deployment gets no subscriber; its session only sends the
    /// sentinel.
    pub fn attach(
        broadcaster: &Broadcaster,
        store: &DeploymentStatusStore,
        id: DeploymentId,
        config: StreamingConfig,
    ) -> Result<Self, SessionError> {
        let record = store
            .get(id.as_str())
            .map_err(|_| SessionError::NotFound(id.clone()))?;

        let (opening, subscriber) = if record.is_terminal() {
            (LogEvent::sentinel(), None)
        } else {
            let subscriber = broadcaster.subscribe(&id)?;
            (LogEvent::connected(id.as_str(), record.status), Some(subscriber))
        };

        debug!(deployment_id = %id, status = %record.status, "Stream session attached");
        Ok(Self {
            deployment_id: id,
            broadcaster: broadcaster.clone(),
            opening,
            subscriber,
            config,
        })
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    /// Forward events to `transport` until the session ends.
    pub async fn run<T: EventTransport>(mut self, mut transport: T) -> SessionEnd {
        let end = match self.subscriber.take() {
            Some(mut subscriber) => {
                let end = self.stream(&mut subscriber, &mut transport).await;
                self.broadcaster.unsubscribe(&mut subscriber);
                end
            }
            None => match transport.send(self.opening.clone()).await {
                Ok(()) => SessionEnd::Completed,
                Err(TransportClosed) => SessionEnd::Disconnected,
            },
        };
        info!(deployment_id = %self.deployment_id, reason = %end, "Log stream closed");
        end
    }

    async fn stream<T: EventTransport>(
        &self,
        subscriber: &mut Subscriber,
        transport: &mut T,
    ) -> SessionEnd {
        let config = &self.config;
        if transport.send(self.opening.clone()).await.is_err() {
            return SessionEnd::Disconnected;
        }

        let started = Instant::now();
        let max_deadline = config.max_session.map(|limit| started + limit);
        let mut heartbeat = tokio::time::interval_at(
            started + config.heartbeat_interval,
            config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let idle = tokio::time::sleep(config.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;

                _ = transport.closed() => return SessionEnd::Disconnected,

                next = subscriber.recv() => {
                    let Some(event) = next else {
                        return SessionEnd::Retired;
                    };
                    let is_sentinel = event.is_sentinel();
                    if transport.send(event).await.is_err() {
                        return SessionEnd::Disconnected;
                    }
                    if is_sentinel {
                        tokio::select! {
                            _ = tokio::time::sleep(config.close_delay) => {}
                            _ = transport.closed() => {}
                        }
                        return SessionEnd::Completed;
                    }
                    idle.as_mut().reset(Instant::now() + config.idle_timeout);
                }

                _ = heartbeat.tick() => {
                    if transport.send(LogEvent::heartbeat()).await.is_err() {
                        return SessionEnd::Disconnected;
                    }
                }

                _ = &mut idle => return SessionEnd::IdleTimeout,

                _ = deadline(max_deadline) => return SessionEnd::MaxDuration,
            }
        }
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
