//! TOML file configuration structures.
//!
//! These structs directly map to the `deployd.toml` file format. Every
//! section is optional; missing values fall back to the defaults below.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Log streaming section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StreamingConfig {
    /// Per-subscriber queue capacity.
    pub subscriber_buffer: usize,
    /// Session to SSE body buffer.
    pub transport_buffer: usize,
    pub heartbeat_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_session_secs: Option<u64>,
    pub close_delay_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 100,
            transport_buffer: 16,
            heartbeat_secs: 30,
            idle_timeout_secs: 600,
            max_session_secs: None,
            close_delay_ms: 1000,
        }
    }
}

/// Pipeline section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Directory under which per-deployment workspaces are created.
    pub workspace_root: String,
    pub retire_grace_ms: u64,
    pub stages: Vec<StageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_root: "deployments".to_owned(),
            retire_grace_ms: 2000,
            stages: Vec::new(),
        }
    }
}

/// One `[[pipeline.stages]]` entry, discriminated by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StageConfig {
    Command(CommandStageConfig),
    Readiness(ReadinessStageConfig),
}

impl StageConfig {
    pub fn name(&self) -> &str {
        match self {
            StageConfig::Command(stage) => &stage.name,
            StageConfig::Readiness(stage) => &stage.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandStageConfig {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub optional: bool,
    pub timeout_secs: Option<u64>,
    /// Store trimmed stdout under this output name.
    pub capture: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessStageConfig {
    pub name: String,
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    pub address: Option<String>,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_wait_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    5
}
