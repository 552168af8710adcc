//! Application state shared across all request handlers.

use deployd_core::broadcast::Broadcaster;
use deployd_core::config::{ConfigStore, PipelineConfig, StreamingConfig};
use deployd_core::deployer::Deployer;
use deployd_core::status::DeploymentStatusStore;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub deployer: Deployer,
    pub store: DeploymentStatusStore,
    pub broadcaster: Broadcaster,
    /// Fixed at startup.
    pub streaming: Arc<StreamingConfig>,
}

impl AppState {
    /// Build the store, broadcaster and deployer for one server instance.
    pub fn new(streaming: StreamingConfig, pipeline: ConfigStore<PipelineConfig>) -> Self {
        let store = DeploymentStatusStore::new();
        let broadcaster = Broadcaster::new(store.clone(), streaming.subscriber_buffer);
        let deployer = Deployer::new(store.clone(), broadcaster.clone(), pipeline);
        Self {
            deployer,
            store,
            broadcaster,
            streaming: Arc::new(streaming),
        }
    }

    /// The hot-reloadable pipeline plan.
    pub fn pipeline(&self) -> &ConfigStore<PipelineConfig> {
        self.deployer.pipeline()
    }
}
