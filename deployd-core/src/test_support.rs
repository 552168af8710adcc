//! Shared fixtures for unit tests.

use crate::broadcast::{Broadcaster, Subscriber};
use crate::deployment::DeploymentId;
use crate::pipeline::{EventSink, Stage, StageContext, StageOutcome};
use crate::status::DeploymentStatusStore;
use async_trait::async_trait;
use deployd_sdk::objects::{DeploymentRequest, LogEvent};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A store and broadcaster with one running deployment registered.
pub(crate) fn open_deployment(capacity: usize) -> (DeploymentStatusStore, Broadcaster, DeploymentId) {
    let store = DeploymentStatusStore::new();
    let broadcaster = Broadcaster::new(store.clone(), capacity);
    let id = DeploymentId::generate();
    store.create(id.clone()).unwrap();
    broadcaster.open(&id);
    (store, broadcaster, id)
}

/// Everything currently queued for `subscriber`, without waiting.
pub(crate) fn drain(subscriber: &mut Subscriber) -> Vec<LogEvent> {
    std::iter::from_fn(|| subscriber.try_recv()).collect()
}

pub(crate) fn request() -> DeploymentRequest {
    DeploymentRequest {
        repo_url: "https://github.com/acme/shop.git".into(),
        username: "alice".into(),
        github_token: "ghp_test".into(),
        ..Default::default()
    }
}

/// A stage that emits fixed messages and returns a fixed outcome.
pub(crate) struct ScriptedStage {
    name: String,
    outcome: StageOutcome,
    events: Vec<String>,
    write: Option<(String, String)>,
    read: Option<String>,
    seen: Mutex<Option<String>>,
    runs: AtomicUsize,
}

impl ScriptedStage {
    pub(crate) fn new(name: &str, outcome: StageOutcome) -> Self {
        Self {
            name: name.to_owned(),
            outcome,
            events: Vec::new(),
            write: None,
            read: None,
            seen: Mutex::new(None),
            runs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn success(name: &str) -> Self {
        Self::new(name, StageOutcome::Success)
    }

    pub(crate) fn with_events(mut self, events: &[&str]) -> Self {
        self.events = events.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub(crate) fn writing(mut self, key: &str, value: &str) -> Self {
        self.write = Some((key.to_owned(), value.to_owned()));
        self
    }

    pub(crate) fn reading(mut self, key: &str) -> Self {
        self.read = Some(key.to_owned());
        self
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Option<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext, sink: &EventSink) -> StageOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for message in &self.events {
            sink.info(message.clone());
        }
        if let Some((key, value)) = &self.write {
            ctx.set_output(key.clone(), value.clone());
        }
        if let Some(key) = &self.read {
            *self.seen.lock().unwrap() = ctx.output(key);
        }
        self.outcome.clone()
    }
}

pub(crate) struct PanickingStage;

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        "explode"
    }

    async fn run(&self, _ctx: &StageContext, _sink: &EventSink) -> StageOutcome {
        panic!("stage blew up");
    }
}
