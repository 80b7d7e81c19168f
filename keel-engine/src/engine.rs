//! Step lifecycle orchestration
//!
//! Maps each step of a pipeline onto a container:
//! - Setup: create ephemeral volumes and the run network
//! - Create: resolve and pull the image, create the container, inject files
//! - Start / Wait: run the container and collect its exit state
//! - Tail: stream the container's combined output
//! - Destroy: reclaim every container, volume and the network

use async_trait::async_trait;
use futures::StreamExt;
use keel_core::auth::lookup_auth;
use keel_core::domain::pipeline::{PipelineSpec, lookup_file};
use keel_core::domain::state::ExecutionState;
use keel_core::domain::step::{PullPolicy, Step};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::archive::build_archive;
use crate::convert::to_container_spec;
use crate::error::{EngineError, Result};
use crate::reference::parse_image;
use crate::runtime::{
    ContainerRuntime, ContainerSpec, CopyOptions, PullCredentials, RemoveOptions, RuntimeError,
};
use crate::tail::LogReader;

/// How many times Create pulls and retries after the runtime reports the
/// image as missing
pub const IMAGE_NOT_FOUND_RETRIES: u32 = 1;

const KILL_SIGNAL: &str = "9";
const COPY_ROOT: &str = "/";

/// Execution backend for one pipeline run
///
/// Setup and Destroy must not run concurrently with step operations. Tail
/// and Wait are meant to run concurrently on the same step. Every operation
/// is cancelled by dropping its future.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Creates the run's ephemeral volumes and network
    ///
    /// Fails fast; resources created before the failure are left for
    /// [`Engine::destroy`].
    async fn setup(&self, spec: &PipelineSpec) -> Result<()>;

    /// Creates the step's container and injects its files
    async fn create(&self, spec: &PipelineSpec, step: &Step) -> Result<()>;

    /// Starts the step's container without waiting for it to be ready
    async fn start(&self, spec: &PipelineSpec, step: &Step) -> Result<()>;

    /// Blocks until the step's container exits
    async fn wait(&self, spec: &PipelineSpec, step: &Step) -> Result<ExecutionState>;

    /// Streams the step's combined stdout/stderr
    async fn tail(&self, spec: &PipelineSpec, step: &Step) -> Result<LogReader>;

    /// Reclaims every resource of the run
    ///
    /// Safe to call after a partial Setup and more than once.
    async fn destroy(&self, spec: &PipelineSpec) -> Result<CleanupReport>;
}

/// Cleanup failures that Destroy swallowed
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub suppressed: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// Returns true if every resource was reclaimed
    pub fn is_clean(&self) -> bool {
        self.suppressed.is_empty()
    }
}

/// A resource Destroy failed to reclaim
#[derive(Debug)]
pub struct CleanupFailure {
    /// Name of the runtime resource
    pub resource: String,
    pub error: RuntimeError,
}

/// [`Engine`] implementation on top of a [`ContainerRuntime`]
#[derive(Clone)]
pub struct ContainerEngine {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerEngine {
    /// Creates an engine driving the given runtime
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    async fn pull(&self, image: &str, credentials: Option<&PullCredentials>) -> Result<()> {
        info!("Pulling image {}", image);
        self.runtime
            .pull_image(image, credentials)
            .await
            .map_err(|source| EngineError::PullFailure {
                image: image.to_string(),
                source,
            })
    }

    /// Creates the container, pulling and retrying once if the image is
    /// missing locally and the pull policy allows it
    async fn create_container(
        &self,
        container: &ContainerSpec,
        pull_policy: PullPolicy,
        credentials: Option<&PullCredentials>,
    ) -> Result<()> {
        let mut retries_left = match pull_policy {
            PullPolicy::Never => 0,
            PullPolicy::Default | PullPolicy::Always => IMAGE_NOT_FOUND_RETRIES,
        };

        loop {
            match self.runtime.create_container(container).await {
                Ok(()) => return Ok(()),
                Err(RuntimeError::ImageNotFound(_)) if retries_left > 0 => {
                    retries_left -= 1;
                    info!(
                        "Image {} not found locally for container {}",
                        container.image, container.name
                    );
                    self.pull(&container.image, credentials).await?;
                }
                Err(RuntimeError::ImageNotFound(_)) => {
                    return Err(EngineError::ImageNotFound(container.image.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn inject_files(&self, spec: &PipelineSpec, step: &Step) -> Result<()> {
        let options = CopyOptions {
            allow_overwrite_dir_with_file: false,
        };

        for mount in &step.files {
            let Some(file) = lookup_file(spec, &mount.name) else {
                debug!(
                    "Step {} references unknown file {}, nothing to inject",
                    step.metadata.name, mount.name
                );
                continue;
            };

            let archive = build_archive(&mount.path, mount.mode, &file.data)?;
            self.runtime
                .copy_to_container(&step.metadata.uid, COPY_ROOT, archive, options)
                .await?;
            debug!("Copied {} to {}:{}", mount.name, step.metadata.uid, mount.path);
        }

        Ok(())
    }
}

#[async_trait]
impl Engine for ContainerEngine {
    async fn setup(&self, spec: &PipelineSpec) -> Result<()> {
        for volume in spec.ephemeral_volumes() {
            debug!("Creating volume {}", volume.metadata.uid);
            self.runtime
                .create_volume(&volume.metadata.uid, &spec.metadata.labels)
                .await?;
        }

        info!("Creating network {}", spec.metadata.uid);
        self.runtime
            .create_network(&spec.metadata.uid, &spec.metadata.labels)
            .await?;

        Ok(())
    }

    async fn create(&self, spec: &PipelineSpec, step: &Step) -> Result<()> {
        let docker = step
            .docker
            .as_ref()
            .ok_or_else(|| EngineError::MissingConfiguration(step.metadata.name.clone()))?;

        let image = parse_image(&docker.image)?;

        let credentials = lookup_auth(spec, &image.domain)
            .map(|auth| PullCredentials::encode(auth, &image.domain));
        if credentials.is_some() {
            debug!("Using registry credentials for {}", image.domain);
        }

        let pull = match docker.pull_policy {
            PullPolicy::Always => true,
            PullPolicy::Default => image.latest,
            PullPolicy::Never => false,
        };
        if pull {
            self.pull(&image.canonical, credentials.as_ref()).await?;
        }

        info!(
            "Creating container {} for step {} with image {}",
            step.metadata.uid, step.metadata.name, image.canonical
        );
        let container = to_container_spec(spec, step, docker, &image.canonical);
        self.create_container(&container, docker.pull_policy, credentials.as_ref())
            .await?;

        self.inject_files(spec, step).await
    }

    async fn start(&self, _spec: &PipelineSpec, step: &Step) -> Result<()> {
        info!("Starting container {}", step.metadata.uid);
        self.runtime.start_container(&step.metadata.uid).await?;
        Ok(())
    }

    async fn wait(&self, _spec: &PipelineSpec, step: &Step) -> Result<ExecutionState> {
        let id = &step.metadata.uid;

        // completion and a failed wait request race; whichever arrives first
        // ends the wait and the final state comes from inspection
        let mut wait = self.runtime.wait_container(id);
        match wait.next().await {
            Some(Ok(code)) => debug!("Container {} exited with code {}", id, code),
            Some(Err(e)) => debug!("Wait on container {} ended with error: {}", id, e),
            None => debug!("Wait on container {} closed without a result", id),
        }

        let status = self.runtime.inspect_container(id).await?;
        if status.running {
            // reported as-is; re-waiting is left to the caller
            warn!("Container {} still running after wait returned", id);
        }

        Ok(ExecutionState {
            exited: !status.running,
            exit_code: status.exit_code,
            oom_killed: status.oom_killed,
        })
    }

    async fn tail(&self, _spec: &PipelineSpec, step: &Step) -> Result<LogReader> {
        let id = &step.metadata.uid;
        let logs = self.runtime.container_logs(id).await?;
        Ok(LogReader::spawn(id.clone(), logs))
    }

    async fn destroy(&self, spec: &PipelineSpec) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let remove = RemoveOptions {
            force: true,
            volumes: true,
        };

        for step in &spec.steps {
            let id = &step.metadata.uid;
            if let Err(e) = self.runtime.kill_container(id, KILL_SIGNAL).await {
                debug!("Kill of container {} failed: {}", id, e);
            }
            match self.runtime.remove_container(id, remove).await {
                Ok(()) => debug!("Container {} removed", id),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!("Failed to remove container {}: {}", id, e);
                    report.suppressed.push(CleanupFailure {
                        resource: id.clone(),
                        error: e,
                    });
                }
            }
        }

        // the first volume failure stops volume cleanup; the rest are left
        // for a later pass
        let mut volume_error = None;
        for volume in spec.ephemeral_volumes() {
            match self.runtime.remove_volume(&volume.metadata.uid).await {
                Ok(()) => debug!("Volume {} removed", volume.metadata.uid),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!("Failed to remove volume {}: {}", volume.metadata.uid, e);
                    volume_error = Some(e);
                    break;
                }
            }
        }

        let network = match self.runtime.remove_network(&spec.metadata.uid).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        };

        if let Some(e) = volume_error {
            return Err(e.into());
        }
        network?;

        info!("Cleanup complete for run {}", spec.metadata.uid);
        Ok(report)
    }
}
