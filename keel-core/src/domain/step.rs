//! Step domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::pipeline::Metadata;

/// One container-backed unit of pipeline work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub metadata: Metadata,
    #[serde(default)]
    pub docker: Option<DockerStep>,
    #[serde(default)]
    pub envs: HashMap<String, String>,
    #[serde(default)]
    pub files: Vec<FileMount>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub run_policy: RunPolicy,
    /// Detached steps are started but never awaited
    #[serde(default)]
    pub detached: bool,
}

/// Container configuration of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerStep {
    pub image: String,
    #[serde(default)]
    pub pull_policy: PullPolicy,
    /// Overrides the image entrypoint when non-empty
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub dns_search: Vec<String>,
    #[serde(default)]
    pub extra_hosts: Vec<String>,
    #[serde(default)]
    pub network_aliases: Vec<String>,
}

impl DockerStep {
    /// Creates a configuration for the given image with default settings
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            pull_policy: PullPolicy::Default,
            command: Vec::new(),
            args: Vec::new(),
            privileged: false,
            user: None,
            dns: Vec::new(),
            dns_search: Vec::new(),
            extra_hosts: Vec::new(),
            network_aliases: Vec::new(),
        }
    }
}

/// Rule governing whether an image is fetched before container creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Pull only floating (`:latest`) references
    #[default]
    Default,
    Always,
    Never,
}

/// Condition under which the runner executes a step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPolicy {
    #[default]
    OnSuccess,
    OnFailure,
    Always,
    Never,
}

impl RunPolicy {
    /// Decides whether a step runs given the failure state of the run so far
    pub fn should_run(&self, run_failed: bool) -> bool {
        match self {
            RunPolicy::OnSuccess => !run_failed,
            RunPolicy::OnFailure => run_failed,
            RunPolicy::Always => true,
            RunPolicy::Never => false,
        }
    }
}

/// Resource limits applied to a step container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Memory limit in bytes
    #[serde(default)]
    pub memory_limit: Option<i64>,
    #[serde(default)]
    pub cpu_shares: Option<i64>,
    #[serde(default)]
    pub cpu_quota: Option<i64>,
    #[serde(default)]
    pub cpu_period: Option<i64>,
    #[serde(default)]
    pub cpuset: Option<String>,
    /// Size of /dev/shm in bytes
    #[serde(default)]
    pub shm_size: Option<i64>,
}

/// Request to inject a named file payload into the step container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMount {
    /// Name of the payload in the pipeline spec
    pub name: String,
    /// Destination path inside the container
    pub path: String,
    #[serde(default = "default_file_mode")]
    pub mode: u32,
}

fn default_file_mode() -> u32 {
    0o644
}

/// Mounts a declared volume into the step container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Name of the volume in the pipeline spec
    pub name: String,
    pub path: String,
}
