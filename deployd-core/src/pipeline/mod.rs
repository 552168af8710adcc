//! Sequential execution of deployment stages.
//!
//! A [`PipelineRunner`] takes a list of [`Stage`] trait objects and runs
//! them in order against a fresh [`Workspace`]. Stages report progress
//! through an [`EventSink`] and may pass values forward through the shared
//! [`StageContext`].

mod context;
mod runner;
mod sink;
mod stage;
mod workspace;

pub use context::StageContext;
pub use runner::{PipelineRunner, RunSummary};
pub use sink::EventSink;
pub use stage::{Stage, StageOutcome};
pub use workspace::{Workspace, WorkspaceError};
