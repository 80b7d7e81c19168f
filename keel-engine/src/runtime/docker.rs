//! Docker Engine API implementation of the container runtime

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, Mount, MountTypeEnum};
use bollard::network::CreateNetworkOptions;
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::pin::pin;
use tracing::{debug, trace};

use super::{
    ContainerRuntime, ContainerSpec, ContainerStatus, CopyOptions, LogStream, MountSpec,
    PullCredentials, RemoveOptions, Result, RuntimeError, WaitStream,
};
use crate::demux::{StdStream, encode_frame};

/// Container runtime backed by a Docker (or Docker-compatible) daemon
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(map_error)?;
        Ok(Self { docker })
    }

    /// Wraps an already configured client
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        self.docker.create_network(options).await.map_err(map_error)?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.docker.remove_network(name).await.map_err(map_error)
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            driver: "local".to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        self.docker.create_volume(options).await.map_err(map_error)?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .map_err(map_error)
    }

    async fn pull_image(&self, image: &str, credentials: Option<&PullCredentials>) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let credentials = credentials.map(|c| DockerCredentials {
            username: Some(c.username.clone()),
            password: Some(c.password.clone()),
            serveraddress: Some(c.server_address.clone()),
            ..Default::default()
        });

        // the pull is only complete once the progress stream is drained
        let mut progress = pin!(self.docker.create_image(Some(options), None, credentials));
        while let Some(info) = progress.next().await {
            let info = info.map_err(map_error)?;
            if let Some(status) = info.status {
                trace!("pull {}: {}", image, status);
            }
        }

        debug!("Pulled image {}", image);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let endpoint = EndpointSettings {
            aliases: Some(spec.network.aliases.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: non_empty(&spec.entrypoint),
            cmd: non_empty(&spec.cmd),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            working_dir: spec.working_dir.clone(),
            user: spec.user.clone(),
            host_config: Some(host_config(spec)),
            networking_config: Some(NetworkingConfig {
                endpoints_config: HashMap::from([(spec.network.network.clone(), endpoint)]),
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_error)?;
        for warning in response.warnings {
            debug!("create {}: {}", spec.name, warning);
        }
        Ok(())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    fn wait_container(&self, id: &str) -> WaitStream {
        let docker = self.docker.clone();
        let id = id.to_string();

        futures::stream::once(async move {
            let options = WaitContainerOptions {
                condition: "not-running".to_string(),
            };
            let mut wait = pin!(docker.wait_container(&id, Some(options)));
            match wait.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // non-zero exits arrive as errors but are completions
                Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(err)) => Err(map_error(err)),
                None => Err(RuntimeError::Transport(format!(
                    "wait stream for {} closed without a result",
                    id
                ))),
            }
        })
        .boxed()
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_error)?;
        let state = info.state.unwrap_or_default();

        Ok(ContainerStatus {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code.unwrap_or(0),
            oom_killed: state.oom_killed.unwrap_or(false),
        })
    }

    async fn kill_container(&self, id: &str, signal: &str) -> Result<()> {
        let options = KillContainerOptions {
            signal: signal.to_string(),
        };
        self.docker
            .kill_container(id, Some(options))
            .await
            .map_err(map_error)
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()> {
        let options = RemoveContainerOptions {
            force: options.force,
            v: options.volumes,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(map_error)
    }

    async fn copy_to_container(
        &self,
        id: &str,
        path: &str,
        archive: Bytes,
        options: CopyOptions,
    ) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            no_overwrite_dir_non_dir: (!options.allow_overwrite_dir_with_file).to_string(),
        };
        self.docker
            .upload_to_container(id, Some(options), archive)
            .await
            .map_err(map_error)
    }

    async fn container_logs(&self, id: &str) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: "all".to_string(),
            ..Default::default()
        };

        // bollard hands back frames it has already split by channel; restore
        // the wire framing so every runtime feeds the tailer the same format
        let stream = self
            .docker
            .logs(id, Some(options))
            .map(|chunk| chunk.map(reframe).map_err(map_error))
            .boxed();
        Ok(stream)
    }
}

fn reframe(output: LogOutput) -> Bytes {
    match output {
        LogOutput::StdOut { message } => encode_frame(StdStream::Stdout, &message),
        LogOutput::StdErr { message } => encode_frame(StdStream::Stderr, &message),
        LogOutput::StdIn { message } => encode_frame(StdStream::Stdin, &message),
        LogOutput::Console { message } => encode_frame(StdStream::Stdout, &message),
    }
}

fn host_config(spec: &ContainerSpec) -> HostConfig {
    let resources = &spec.host.resources;
    let mounts = spec
        .host
        .mounts
        .iter()
        .map(|mount| match mount {
            MountSpec::Volume { source, target } => Mount {
                source: Some(source.clone()),
                target: Some(target.clone()),
                typ: Some(MountTypeEnum::VOLUME),
                ..Default::default()
            },
            MountSpec::Bind { source, target } => Mount {
                source: Some(source.clone()),
                target: Some(target.clone()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            },
        })
        .collect();

    HostConfig {
        privileged: Some(spec.host.privileged),
        network_mode: Some(spec.network.network.clone()),
        dns: non_empty(&spec.host.dns),
        dns_search: non_empty(&spec.host.dns_search),
        extra_hosts: non_empty(&spec.host.extra_hosts),
        mounts: Some(mounts),
        memory: resources.memory_limit,
        cpu_shares: resources.cpu_shares,
        cpu_quota: resources.cpu_quota,
        cpu_period: resources.cpu_period,
        cpuset_cpus: resources.cpuset.clone(),
        shm_size: resources.shm_size,
        ..Default::default()
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

fn map_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => {
            if message.contains("No such image") {
                RuntimeError::ImageNotFound(message)
            } else {
                RuntimeError::NotFound(message)
            }
        }
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api {
            status: status_code,
            message,
        },
        other => RuntimeError::Transport(other.to_string()),
    }
}
