//! Runtime configuration types.
//!
//! These are the validated values the core runs on. Parsing the config
//! file is handled by the server crate.

mod config_store;
mod pipeline;
mod streaming;

pub use config_store::ConfigStore;
pub use pipeline::{CommandPlan, DEFAULT_RETIRE_GRACE, PipelineConfig, ReadinessPlan, StagePlan};
pub use streaming::StreamingConfig;
