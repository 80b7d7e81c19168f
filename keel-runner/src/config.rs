//! Runner configuration
//!
//! Settings come from command-line flags with environment fallbacks (see
//! `main.rs`) and are validated before a run starts.

use anyhow::{Context, Result};
use clap::ValueEnum;
use keel_core::auth::{merge_auths, parse_docker_config};
use keel_core::domain::pipeline::PipelineSpec;
use std::path::PathBuf;
use std::time::Duration;

/// Output format of the runner's own logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the pipeline specification (JSON)
    pub spec_path: PathBuf,

    /// Docker `config.json` to read registry credentials from
    pub docker_config: Option<PathBuf>,

    /// Maximum time a single step may run
    pub step_timeout: Duration,

    pub log_format: LogFormat,
}

impl Config {
    /// Creates a configuration with defaults for everything but the spec path
    pub fn new(spec_path: PathBuf) -> Self {
        Self {
            spec_path,
            docker_config: None,
            step_timeout: Duration::from_secs(3600),
            log_format: LogFormat::Text,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.spec_path.as_os_str().is_empty() {
            anyhow::bail!("spec path cannot be empty");
        }

        if let Some(path) = &self.docker_config {
            if path.as_os_str().is_empty() {
                anyhow::bail!("docker config path cannot be empty");
            }
        }

        if self.step_timeout.is_zero() {
            anyhow::bail!("step_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Reads the pipeline specification and merges registry credentials
    /// from the Docker config, if one is configured
    pub fn load_spec(&self) -> Result<PipelineSpec> {
        let json = std::fs::read_to_string(&self.spec_path)
            .with_context(|| format!("Failed to read spec {}", self.spec_path.display()))?;
        let mut spec = PipelineSpec::from_json(&json)
            .with_context(|| format!("Failed to parse spec {}", self.spec_path.display()))?;

        if let Some(path) = &self.docker_config {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read docker config {}", path.display()))?;
            let auths = parse_docker_config(&json)
                .with_context(|| format!("Failed to parse docker config {}", path.display()))?;
            merge_auths(&mut spec, auths);
        }

        Ok(spec)
    }
}
