//! In-memory container runtime used by the engine tests
//!
//! Records every call and keeps just enough state (images, containers,
//! volumes, networks) to mimic the runtime's error signals.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use keel_core::domain::pipeline::{
    DockerSpec, File, Metadata, PipelineSpec, RegistryAuth, Volume, VolumeKind,
};
use keel_core::domain::step::{DockerStep, FileMount, Step};
use keel_engine::runtime::{
    ContainerRuntime, ContainerSpec, ContainerStatus, CopyOptions, LogStream, PullCredentials,
    RemoveOptions, Result, RuntimeError, WaitStream,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateNetwork(String),
    RemoveNetwork(String),
    CreateVolume(String),
    RemoveVolume(String),
    Pull(String),
    CreateContainer(String),
    Start(String),
    Wait(String),
    Inspect(String),
    Kill(String),
    RemoveContainer(String),
    Copy(String),
    Logs(String),
}

#[derive(Debug, Clone)]
pub struct Copied {
    pub container: String,
    pub path: String,
    pub archive: Bytes,
    pub options: CopyOptions,
}

#[derive(Default)]
struct State {
    images: HashSet<String>,
    containers: HashMap<String, ContainerSpec>,
    statuses: HashMap<String, ContainerStatus>,
    networks: HashMap<String, HashMap<String, String>>,
    volumes: HashMap<String, HashMap<String, String>>,
    logs: HashMap<String, Vec<Bytes>>,
    credentials: Vec<Option<PullCredentials>>,
    copies: Vec<Copied>,
    fail_pulls: bool,
    pulls_provide_image: bool,
    fail_wait: bool,
    fail_volume_create: HashSet<String>,
    fail_volume_remove: HashSet<String>,
    fail_container_remove: HashSet<String>,
}

pub struct FakeRuntime {
    calls: Mutex<Vec<Call>>,
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(State {
                pulls_provide_image: true,
                ..Default::default()
            }),
        }
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().unwrap().images.insert(image.to_string());
        self
    }

    pub fn fail_pulls(self) -> Self {
        self.state.lock().unwrap().fail_pulls = true;
        self
    }

    /// Pulls succeed but the image never shows up locally
    pub fn pulls_without_image(self) -> Self {
        self.state.lock().unwrap().pulls_provide_image = false;
        self
    }

    pub fn fail_wait(self) -> Self {
        self.state.lock().unwrap().fail_wait = true;
        self
    }

    pub fn fail_volume_create(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_volume_create
            .insert(name.to_string());
        self
    }

    pub fn fail_volume_remove(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_volume_remove
            .insert(name.to_string());
        self
    }

    pub fn fail_container_remove(self, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_container_remove
            .insert(id.to_string());
        self
    }

    pub fn set_status(&self, id: &str, status: ContainerStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(id.to_string(), status);
    }

    pub fn set_logs(&self, id: &str, chunks: Vec<Bytes>) {
        self.state.lock().unwrap().logs.insert(id.to_string(), chunks);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Pull(image) => Some(image),
                _ => None,
            })
            .collect()
    }

    pub fn credentials(&self) -> Vec<Option<PullCredentials>> {
        self.state.lock().unwrap().credentials.clone()
    }

    pub fn copies(&self) -> Vec<Copied> {
        self.state.lock().unwrap().copies.clone()
    }

    pub fn container(&self, id: &str) -> Option<ContainerSpec> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.state.lock().unwrap().networks.contains_key(name)
    }

    pub fn network_labels(&self, name: &str) -> Option<HashMap<String, String>> {
        self.state.lock().unwrap().networks.get(name).cloned()
    }

    pub fn volume_labels(&self, name: &str) -> Option<HashMap<String, String>> {
        self.state.lock().unwrap().volumes.get(name).cloned()
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.lock().unwrap().volumes.contains_key(name)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn api_error(message: &str) -> RuntimeError {
    RuntimeError::Api {
        status: 500,
        message: message.to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        self.record(Call::CreateNetwork(name.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.networks.contains_key(name) {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!("network {name} already exists"),
            });
        }
        state.networks.insert(name.to_string(), labels.clone());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.record(Call::RemoveNetwork(name.to_string()));
        match self.state.lock().unwrap().networks.remove(name) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(format!("network {name}"))),
        }
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        self.record(Call::CreateVolume(name.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.fail_volume_create.contains(name) {
            return Err(api_error("volume driver failure"));
        }
        state.volumes.insert(name.to_string(), labels.clone());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.record(Call::RemoveVolume(name.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.fail_volume_remove.contains(name) {
            return Err(api_error("volume is in use"));
        }
        match state.volumes.remove(name) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(format!("volume {name}"))),
        }
    }

    async fn pull_image(&self, image: &str, credentials: Option<&PullCredentials>) -> Result<()> {
        self.record(Call::Pull(image.to_string()));
        let mut state = self.state.lock().unwrap();
        state.credentials.push(credentials.cloned());
        if state.fail_pulls {
            return Err(api_error("registry unavailable"));
        }
        if state.pulls_provide_image {
            state.images.insert(image.to_string());
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        self.record(Call::CreateContainer(spec.name.clone()));
        let mut state = self.state.lock().unwrap();
        if !state.images.contains(&spec.image) {
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }
        state.containers.insert(spec.name.clone(), spec.clone());
        state
            .statuses
            .entry(spec.name.clone())
            .or_insert_with(ContainerStatus::default);
        Ok(())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record(Call::Start(id.to_string()));
        if self.state.lock().unwrap().containers.contains_key(id) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(format!("container {id}")))
        }
    }

    fn wait_container(&self, id: &str) -> WaitStream {
        self.record(Call::Wait(id.to_string()));
        let state = self.state.lock().unwrap();
        let result = if state.fail_wait {
            Err(RuntimeError::Transport("wait connection dropped".to_string()))
        } else {
            Ok(state
                .statuses
                .get(id)
                .map(|status| status.exit_code)
                .unwrap_or_default())
        };
        futures::stream::once(async move { result }).boxed()
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus> {
        self.record(Call::Inspect(id.to_string()));
        self.state
            .lock()
            .unwrap()
            .statuses
            .get(id)
            .copied()
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))
    }

    async fn kill_container(&self, id: &str, _signal: &str) -> Result<()> {
        self.record(Call::Kill(id.to_string()));
        let state = self.state.lock().unwrap();
        match state.statuses.get(id) {
            None => Err(RuntimeError::NotFound(format!("container {id}"))),
            Some(status) if !status.running => Err(RuntimeError::Api {
                status: 409,
                message: format!("container {id} is not running"),
            }),
            Some(_) => Ok(()),
        }
    }

    async fn remove_container(&self, id: &str, _options: RemoveOptions) -> Result<()> {
        self.record(Call::RemoveContainer(id.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.fail_container_remove.contains(id) {
            return Err(api_error("device or resource busy"));
        }
        state.statuses.remove(id);
        match state.containers.remove(id) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(format!("container {id}"))),
        }
    }

    async fn copy_to_container(
        &self,
        id: &str,
        path: &str,
        archive: Bytes,
        options: CopyOptions,
    ) -> Result<()> {
        self.record(Call::Copy(id.to_string()));
        let mut state = self.state.lock().unwrap();
        if !state.containers.contains_key(id) {
            return Err(RuntimeError::NotFound(format!("container {id}")));
        }
        state.copies.push(Copied {
            container: id.to_string(),
            path: path.to_string(),
            archive,
            options,
        });
        Ok(())
    }

    async fn container_logs(&self, id: &str) -> Result<LogStream> {
        self.record(Call::Logs(id.to_string()));
        let chunks = self
            .state
            .lock()
            .unwrap()
            .logs
            .get(id)
            .cloned()
            .unwrap_or_default();
        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

// =============================================================================
// Specification builders
// =============================================================================

pub fn metadata(uid: &str, name: &str) -> Metadata {
    Metadata {
        uid: uid.to_string(),
        name: name.to_string(),
        labels: HashMap::new(),
    }
}

pub fn step(uid: &str, image: &str) -> Step {
    Step {
        metadata: metadata(uid, uid),
        docker: Some(DockerStep::new(image)),
        envs: HashMap::new(),
        files: Vec::new(),
        volumes: Vec::new(),
        working_dir: None,
        resources: Default::default(),
        run_policy: Default::default(),
        detached: false,
    }
}

pub fn file_mount(name: &str, path: &str) -> FileMount {
    FileMount {
        name: name.to_string(),
        path: path.to_string(),
        mode: 0o600,
    }
}

pub fn pipeline(steps: Vec<Step>) -> PipelineSpec {
    let mut metadata = metadata("run-1", "pipeline");
    metadata
        .labels
        .insert("io.keel.run".to_string(), "run-1".to_string());

    PipelineSpec {
        metadata,
        steps,
        docker: Some(DockerSpec::default()),
        files: Vec::new(),
    }
}

pub fn with_volumes(mut spec: PipelineSpec, volumes: &[(&str, bool)]) -> PipelineSpec {
    let docker = spec.docker.get_or_insert_with(Default::default);
    for (uid, ephemeral) in volumes {
        let kind = if *ephemeral {
            VolumeKind::EmptyDir
        } else {
            VolumeKind::HostPath {
                path: format!("/srv/{uid}"),
            }
        };
        docker.volumes.push(Volume {
            metadata: metadata(uid, uid),
            kind,
        });
    }
    spec
}

pub fn with_auth(mut spec: PipelineSpec, address: &str) -> PipelineSpec {
    spec.docker
        .get_or_insert_with(Default::default)
        .auths
        .push(RegistryAuth {
            address: address.to_string(),
            username: "robot".to_string(),
            password: "s3cret".to_string(),
        });
    spec
}

pub fn with_file(mut spec: PipelineSpec, name: &str, data: &[u8]) -> PipelineSpec {
    spec.files.push(File {
        metadata: metadata(name, name),
        data: data.to_vec(),
    });
    spec
}
