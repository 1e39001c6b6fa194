//! Engine configuration
//!
//! Loaded from YAML and optionally overridden from the environment:
//!
//! ```yaml
//! recursion_limit: 40
//! default_retry:
//!   max_attempts: 3
//!   initial_interval: 0.5
//! checkpoint:
//!   backend: file
//!   dir: /var/lib/convgraph
//!   format: bincode
//! ```
//!
//! Supported environment variables:
//! - `CONVGRAPH_RECURSION_LIMIT`: node executions allowed per run
//! - `CONVGRAPH_CHECKPOINT_DIR`: switch to the file backend in this directory
//! - `CONVGRAPH_CHECKPOINT_FORMAT`: `json` or `bincode` for the file backend
//! - `CONVGRAPH_MAX_ATTEMPTS`: attempts of the default retry policy

use crate::compiled::DEFAULT_RECURSION_LIMIT;
use crate::error::{GraphError, Result};
use crate::retry::RetryPolicy;
use convgraph_checkpoint::{
    BincodeSerializer, CheckpointSaver, FileCheckpointSaver, InMemoryCheckpointSaver,
    JsonSerializer,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

pub const ENV_RECURSION_LIMIT: &str = "CONVGRAPH_RECURSION_LIMIT";
pub const ENV_CHECKPOINT_DIR: &str = "CONVGRAPH_CHECKPOINT_DIR";
pub const ENV_CHECKPOINT_FORMAT: &str = "CONVGRAPH_CHECKPOINT_FORMAT";
pub const ENV_MAX_ATTEMPTS: &str = "CONVGRAPH_MAX_ATTEMPTS";

/// Encoding of checkpoint frames on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointFormat {
    #[default]
    Json,
    Bincode,
}

impl FromStr for CheckpointFormat {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "bincode" => Ok(Self::Bincode),
            other => Err(GraphError::Configuration(format!(
                "Unknown checkpoint format '{other}', expected 'json' or 'bincode'"
            ))),
        }
    }
}

/// Where checkpoints are kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// Process memory; lost on exit
    #[default]
    Memory,
    /// One append-only log per thread under `dir`
    File {
        dir: PathBuf,
        #[serde(default)]
        format: CheckpointFormat,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Node executions allowed in a single run
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    /// Retry policy for nodes without their own; `None` means one attempt
    #[serde(default)]
    pub default_retry: Option<RetryPolicy>,

    #[serde(default)]
    pub checkpoint: CheckpointBackend,
}

fn default_recursion_limit() -> usize {
    DEFAULT_RECURSION_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
            default_retry: None,
            checkpoint: CheckpointBackend::Memory,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GraphError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| GraphError::Configuration(format!("Failed to parse YAML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, then apply environment overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CONVGRAPH_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = lookup(ENV_RECURSION_LIMIT) {
            self.recursion_limit = parse_number(ENV_RECURSION_LIMIT, &limit)?;
        }

        if let Some(dir) = lookup(ENV_CHECKPOINT_DIR) {
            let format = match &self.checkpoint {
                CheckpointBackend::File { format, .. } => *format,
                CheckpointBackend::Memory => CheckpointFormat::default(),
            };
            self.checkpoint = CheckpointBackend::File {
                dir: PathBuf::from(dir),
                format,
            };
        }

        if let Some(value) = lookup(ENV_CHECKPOINT_FORMAT) {
            let parsed: CheckpointFormat = value.parse()?;
            match &mut self.checkpoint {
                CheckpointBackend::File { format, .. } => *format = parsed,
                CheckpointBackend::Memory => {
                    warn!(
                        variable = ENV_CHECKPOINT_FORMAT,
                        "Ignoring checkpoint format for the memory backend"
                    );
                }
            }
        }

        if let Some(attempts) = lookup(ENV_MAX_ATTEMPTS) {
            let attempts = parse_number(ENV_MAX_ATTEMPTS, &attempts)?;
            self.default_retry
                .get_or_insert_with(RetryPolicy::default)
                .max_attempts = attempts;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.recursion_limit == 0 {
            return Err(GraphError::Configuration(
                "recursion_limit must be greater than 0".to_string(),
            ));
        }

        if let Some(policy) = &self.default_retry {
            policy.validate().map_err(GraphError::Configuration)?;
        }

        if let CheckpointBackend::File { dir, .. } = &self.checkpoint {
            if dir.as_os_str().is_empty() {
                return Err(GraphError::Configuration(
                    "checkpoint dir cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Instantiate the configured checkpoint saver
    ///
    /// Performs no I/O; the file backend creates its directory on first save.
    pub fn build_checkpointer(&self) -> Result<Arc<dyn CheckpointSaver>> {
        self.validate()?;
        let saver: Arc<dyn CheckpointSaver> = match &self.checkpoint {
            CheckpointBackend::Memory => Arc::new(InMemoryCheckpointSaver::new()),
            CheckpointBackend::File {
                dir,
                format: CheckpointFormat::Json,
            } => Arc::new(FileCheckpointSaver::new(dir.clone(), JsonSerializer)),
            CheckpointBackend::File {
                dir,
                format: CheckpointFormat::Bincode,
            } => Arc::new(FileCheckpointSaver::new(dir.clone(), BincodeSerializer)),
        };
        Ok(saver)
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = Some(policy);
        self
    }

    pub fn with_checkpoint(mut self, backend: CheckpointBackend) -> Self {
        self.checkpoint = backend;
        self
    }
}

fn parse_number(variable: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        GraphError::Configuration(format!("{variable} must be a positive integer, got '{value}'"))
    })
}
