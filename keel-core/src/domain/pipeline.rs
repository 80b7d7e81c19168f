//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::step::Step;

/// Identity shared by every entity that maps onto a runtime resource
///
/// The `uid` names the network, volume or container backing the entity. It is
/// derived once, when the pipeline spec is loaded, and never regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default = "generate_uid")]
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Metadata {
    /// Creates metadata with a freshly generated uid
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            uid: generate_uid(),
            name: name.into(),
            labels: HashMap::new(),
        }
    }
}

fn generate_uid() -> String {
    format!("keel-{}", Uuid::new_v4().simple())
}

/// Immutable description of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub metadata: Metadata,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub docker: Option<DockerSpec>,
    #[serde(default)]
    pub files: Vec<File>,
}

impl PipelineSpec {
    /// Parses a specification from its JSON representation
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Ephemeral volumes the engine creates and removes with the run
    pub fn ephemeral_volumes(&self) -> impl Iterator<Item = &Volume> {
        self.docker
            .iter()
            .flat_map(|docker| docker.volumes.iter())
            .filter(|volume| volume.is_ephemeral())
    }

    /// Finds a declared volume by name
    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.docker
            .as_ref()?
            .volumes
            .iter()
            .find(|volume| volume.metadata.name == name)
    }
}

/// Runtime-specific section of the pipeline spec
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerSpec {
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub auths: Vec<RegistryAuth>,
}

/// A volume declared by the pipeline spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub metadata: Metadata,
    pub kind: VolumeKind,
}

impl Volume {
    /// Returns true for volumes whose lifecycle is tied to the run
    pub fn is_ephemeral(&self) -> bool {
        matches!(self.kind, VolumeKind::EmptyDir)
    }
}

/// Backing storage of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    /// Local-driver volume created in Setup and removed in Destroy
    EmptyDir,
    /// Host directory mounted by reference, never created or removed
    HostPath { path: String },
}

/// Registry credentials keyed by registry address
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub address: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Named file payload available for injection into step containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub metadata: Metadata,
    /// File contents, base64 encoded in the serialized form
    #[serde(with = "base64_data")]
    pub data: Vec<u8>,
}

/// Looks up a named file payload
pub fn lookup_file<'a>(spec: &'a PipelineSpec, name: &str) -> Option<&'a File> {
    spec.files.iter().find(|file| file.metadata.name == name)
}

mod base64_data {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
