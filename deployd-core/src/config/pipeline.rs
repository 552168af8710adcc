//! Pipeline plan: which stages run, in which order, with which settings.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default delay between publishing the sentinel and retiring the
/// registry entry.
pub const DEFAULT_RETIRE_GRACE: Duration = Duration::from_secs(2);

/// Validated pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Per-deployment workspaces are created as `{workspace_root}/{id}`.
    pub workspace_root: PathBuf,
    pub retire_grace: Duration,
    pub stages: Vec<StagePlan>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("deployments"),
            retire_grace: DEFAULT_RETIRE_GRACE,
            stages: Vec::new(),
        }
    }
}

/// One configured stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagePlan {
    Command(CommandPlan),
    Readiness(ReadinessPlan),
}

impl StagePlan {
    pub fn name(&self) -> &str {
        match self {
            StagePlan::Command(plan) => &plan.name,
            StagePlan::Readiness(plan) => &plan.name,
        }
    }
}

/// An external program run inside the deployment workspace.
///
/// `args` and `env` values may contain `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Failures are reported as soft failures and the pipeline continues.
    pub optional: bool,
    pub timeout: Option<Duration>,
    /// Store trimmed stdout under this output name.
    pub capture: Option<String>,
}

impl CommandPlan {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            optional: false,
            timeout: None,
            capture: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Wait, then probe a TCP address once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPlan {
    pub name: String,
    pub wait: Duration,
    /// `host:port`, may contain `{name}` placeholders. No probe when unset.
    pub address: Option<String>,
    pub probe_timeout: Duration,
}
