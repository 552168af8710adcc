//! Configuration module for deployd.
//!
//! Handles loading configuration from the TOML file and CLI arguments,
//! validating it, and converting it into the runtime types of
//! `deployd-core`.

pub mod file;

use crate::config::file::{FileConfig, StageConfig};
use deployd_core::config::{
    CommandPlan, PipelineConfig, ReadinessPlan, StagePlan, StreamingConfig,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Loaded configuration, converted to runtime types.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub streaming: StreamingConfig,
    pub pipeline: PipelineConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Read, override, validate and convert the configuration file.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|source| ConfigError::IoError {
                path: self.config_path.clone(),
                source,
            })?;
        self.load_str(&content)
    }

    /// Reload the configuration (used on SIGHUP).
    ///
    /// Only the pipeline plan is applied at runtime; streaming and listen
    /// settings need a restart.
    pub fn reload_pipeline(&self) -> Result<PipelineConfig, ConfigError> {
        self.load().map(|loaded| loaded.pipeline)
    }

    fn load_str(&self, content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;
        Ok(build_loaded_config(file_config))
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::ValidationError(msg));
    let streaming = &config.streaming;

    if streaming.subscriber_buffer == 0 {
        return invalid("streaming.subscriber_buffer must be greater than 0".into());
    }
    if streaming.transport_buffer == 0 {
        return invalid("streaming.transport_buffer must be greater than 0".into());
    }
    if streaming.heartbeat_secs == 0 {
        return invalid("streaming.heartbeat_secs must be greater than 0".into());
    }
    if streaming.idle_timeout_secs == 0 {
        return invalid("streaming.idle_timeout_secs must be greater than 0".into());
    }
    if streaming.max_session_secs == Some(0) {
        return invalid("streaming.max_session_secs must be greater than 0".into());
    }
    if config.pipeline.workspace_root.trim().is_empty() {
        return invalid("pipeline.workspace_root must not be empty".into());
    }

    let mut names = HashSet::new();
    for stage in &config.pipeline.stages {
        let name = stage.name();
        if name.trim().is_empty() {
            return invalid("stage names must not be empty".into());
        }
        if !names.insert(name) {
            return invalid(format!("duplicate stage name {name:?}"));
        }
        match stage {
            StageConfig::Command(command) => {
                if command.program.trim().is_empty() {
                    return invalid(format!("stage {name:?} has an empty program"));
                }
                if command.timeout_secs == Some(0) {
                    return invalid(format!("stage {name:?} has a zero timeout"));
                }
                if command.capture.as_deref().is_some_and(|c| c.trim().is_empty()) {
                    return invalid(format!("stage {name:?} has an empty capture name"));
                }
            }
            StageConfig::Readiness(readiness) => {
                if readiness
                    .address
                    .as_deref()
                    .is_some_and(|a| a.trim().is_empty())
                {
                    return invalid(format!("stage {name:?} has an empty address"));
                }
            }
        }
    }
    Ok(())
}

fn build_loaded_config(config: FileConfig) -> LoadedConfig {
    let streaming = config.streaming;
    let pipeline = config.pipeline;

    LoadedConfig {
        listen: config.server.listen,
        streaming: StreamingConfig {
            subscriber_buffer: streaming.subscriber_buffer,
            transport_buffer: streaming.transport_buffer,
            heartbeat_interval: Duration::from_secs(streaming.heartbeat_secs),
            idle_timeout: Duration::from_secs(streaming.idle_timeout_secs),
            max_session: streaming.max_session_secs.map(Duration::from_secs),
            close_delay: Duration::from_millis(streaming.close_delay_ms),
        },
        pipeline: PipelineConfig {
            workspace_root: PathBuf::from(pipeline.workspace_root),
            retire_grace: Duration::from_millis(pipeline.retire_grace_ms),
            stages: pipeline.stages.into_iter().map(build_stage_plan).collect(),
        },
    }
}

fn build_stage_plan(stage: StageConfig) -> StagePlan {
    match stage {
        StageConfig::Command(command) => StagePlan::Command(CommandPlan {
            name: command.name,
            program: command.program,
            args: command.args,
            env: command.env,
            optional: command.optional,
            timeout: command.timeout_secs.map(Duration::from_secs),
            capture: command.capture,
        }),
        StageConfig::Readiness(readiness) => StagePlan::Readiness(ReadinessPlan {
            name: readiness.name,
            wait: Duration::from_secs(readiness.wait_secs),
            address: readiness.address,
            probe_timeout: Duration::from_secs(readiness.probe_timeout_secs),
        }),
    }
}
