//! Container runtime capability
//!
//! The engine depends on the container runtime only through the fixed
//! operation set of [`ContainerRuntime`]. The capability is injected, which
//! keeps the engine testable against an in-memory runtime.

mod docker;

pub use docker::DockerRuntime;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use keel_core::domain::pipeline::RegistryAuth;
use keel_core::domain::step::Resources;
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Combined stdout/stderr log stream in the runtime's wire framing
pub type LogStream = BoxStream<'static, Result<Bytes>>;

/// Completion signal of a container; yields the exit code or the error that
/// ended the wait request
pub type WaitStream = BoxStream<'static, Result<i64>>;

/// Errors reported by the container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Referenced container, volume or network does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Image is not present locally
    #[error("No such image: {0}")]
    ImageNotFound(String),

    /// Runtime rejected the request
    #[error("Runtime error (status {status}): {message}")]
    Api {
        /// HTTP status code returned by the runtime
        status: u16,
        /// Error message from the runtime
        message: String,
    },

    /// Runtime could not be reached
    #[error("Runtime transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Check if this error reports a missing resource
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Credentials attached to an image pull
#[derive(Clone, PartialEq, Eq)]
pub struct PullCredentials {
    pub username: String,
    pub password: String,
    pub server_address: String,
}

impl PullCredentials {
    /// Encodes registry credentials for a pull from `domain`
    pub fn encode(auth: &RegistryAuth, domain: &str) -> Self {
        Self {
            username: auth.username.clone(),
            password: auth.password.clone(),
            server_address: domain.to_string(),
        }
    }
}

impl std::fmt::Debug for PullCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullCredentials")
            .field("username", &self.username)
            .field("server_address", &self.server_address)
            .finish_non_exhaustive()
    }
}

/// Everything needed to create one step container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, the step's unique identifier
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    /// Environment as sorted `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub host: HostSpec,
    pub network: NetworkAttachment,
}

/// Host-level settings of a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSpec {
    pub privileged: bool,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub resources: Resources,
}

/// A mount attached to a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSpec {
    /// Named volume managed by the runtime
    Volume { source: String, target: String },
    /// Host directory
    Bind { source: String, target: String },
}

/// Network membership of a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub aliases: Vec<String>,
}

/// State of a container as reported by inspection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStatus {
    pub running: bool,
    pub exit_code: i64,
    pub oom_killed: bool,
}

/// Options for container removal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    /// Also remove anonymous volumes attached to the container
    pub volumes: bool,
}

/// Options for copying an archive into a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    pub allow_overwrite_dir_with_file: bool,
}

/// Operations the engine requires from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a bridge network
    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    /// Removes a network
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Creates a local-driver volume
    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    /// Removes a volume
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Pulls an image, returning once the pull has completed
    async fn pull_image(&self, image: &str, credentials: Option<&PullCredentials>) -> Result<()>;

    /// Creates a container named after `spec.name`
    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    /// Starts a created container
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Subscribes to the completion of a container
    fn wait_container(&self, id: &str) -> WaitStream;

    /// Reads the current state of a container
    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus>;

    /// Sends a signal to a container
    async fn kill_container(&self, id: &str, signal: &str) -> Result<()>;

    /// Removes a container
    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()>;

    /// Extracts a tar archive into the container at `path`
    async fn copy_to_container(
        &self,
        id: &str,
        path: &str,
        archive: Bytes,
        options: CopyOptions,
    ) -> Result<()>;

    /// Follows the combined stdout/stderr output of a container
    async fn container_logs(&self, id: &str) -> Result<LogStream>;
}
