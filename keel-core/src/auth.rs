//! Registry credential lookup
//!
//! Credentials are matched against the registry domain of an image
//! reference. Addresses are normalized so that entries written the way
//! `docker login` writes them (`https://index.docker.io/v1/`) match the
//! domain of a normalized reference (`docker.io`).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::domain::pipeline::{PipelineSpec, RegistryAuth};
use crate::error::{CoreError, Result};

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_ALIASES: &[&str] = &["index.docker.io", "registry-1.docker.io"];

/// Looks up credentials for a registry domain
///
/// Absence of a match is not an error; the caller pulls unauthenticated.
pub fn lookup_auth<'a>(spec: &'a PipelineSpec, domain: &str) -> Option<&'a RegistryAuth> {
    let domain = normalize_address(domain);
    spec.docker
        .as_ref()?
        .auths
        .iter()
        .find(|auth| normalize_address(&auth.address) == domain)
}

/// Reduces a registry address to its bare host[:port] form
pub fn normalize_address(address: &str) -> String {
    let address = address
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = address.split('/').next().unwrap_or(address);

    if DOCKER_HUB_ALIASES.contains(&host) {
        DOCKER_HUB.to_string()
    } else {
        host.to_string()
    }
}

#[derive(Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, DockerConfigEntry>,
}

#[derive(Deserialize)]
struct DockerConfigEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Parses the `auths` section of a Docker `config.json` document
///
/// Each entry either carries a base64 encoded `user:password` pair in its
/// `auth` field or explicit `username`/`password` fields. Entries with
/// neither are skipped.
pub fn parse_docker_config(json: &str) -> Result<Vec<RegistryAuth>> {
    let config: DockerConfig = serde_json::from_str(json)?;
    let mut auths = Vec::with_capacity(config.auths.len());

    for (address, entry) in config.auths {
        if let Some(encoded) = entry.auth.filter(|s| !s.is_empty()) {
            let (username, password) = decode_auth(&address, &encoded)?;
            auths.push(RegistryAuth {
                address,
                username,
                password,
            });
        } else if let (Some(username), Some(password)) = (entry.username, entry.password) {
            auths.push(RegistryAuth {
                address,
                username,
                password,
            });
        }
    }

    Ok(auths)
}

/// Merges credentials into the pipeline spec
///
/// Entries already present in the pipeline spec take precedence over
/// entries for the same registry from `extra`.
pub fn merge_auths(spec: &mut PipelineSpec, extra: Vec<RegistryAuth>) {
    let docker = spec.docker.get_or_insert_with(Default::default);
    for auth in extra {
        let address = normalize_address(&auth.address);
        let known = docker
            .auths
            .iter()
            .any(|existing| normalize_address(&existing.address) == address);
        if !known {
            docker.auths.push(auth);
        }
    }
}

fn decode_auth(registry: &str, encoded: &str) -> Result<(String, String)> {
    let invalid = |reason: &str| CoreError::InvalidCredentials {
        registry: registry.to_string(),
        reason: reason.to_string(),
    };

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| invalid("auth field is not valid base64"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid("auth field is not UTF-8"))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| invalid("auth field must be user:password"))?;

    Ok((username.to_string(), password.to_string()))
}
