//! Step to container translation

use keel_core::domain::pipeline::{PipelineSpec, VolumeKind};
use keel_core::domain::step::{DockerStep, Step};
use tracing::warn;

use crate::runtime::{ContainerSpec, HostSpec, MountSpec, NetworkAttachment};

/// Builds the container configuration of a step
///
/// `image` is the resolved canonical reference. The container is attached to
/// the run network under the step name and any configured aliases.
pub fn to_container_spec(
    spec: &PipelineSpec,
    step: &Step,
    docker: &DockerStep,
    image: &str,
) -> ContainerSpec {
    let mut env: Vec<String> = step
        .envs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    env.sort();

    let mut labels = spec.metadata.labels.clone();
    labels.extend(
        step.metadata
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    let mut aliases = vec![step.metadata.name.clone()];
    aliases.extend(docker.network_aliases.iter().cloned());

    ContainerSpec {
        name: step.metadata.uid.clone(),
        image: image.to_string(),
        entrypoint: docker.command.clone(),
        cmd: docker.args.clone(),
        env,
        labels,
        working_dir: step.working_dir.clone(),
        user: docker.user.clone(),
        host: HostSpec {
            privileged: docker.privileged,
            dns: docker.dns.clone(),
            dns_search: docker.dns_search.clone(),
            extra_hosts: docker.extra_hosts.clone(),
            mounts: to_mounts(spec, step),
            resources: step.resources.clone(),
        },
        network: NetworkAttachment {
            network: spec.metadata.uid.clone(),
            aliases,
        },
    }
}

fn to_mounts(spec: &PipelineSpec, step: &Step) -> Vec<MountSpec> {
    step.volumes
        .iter()
        .filter_map(|mount| {
            let Some(volume) = spec.volume(&mount.name) else {
                warn!(
                    "Step {} mounts undeclared volume {}, skipping",
                    step.metadata.name, mount.name
                );
                return None;
            };
            Some(match &volume.kind {
                VolumeKind::EmptyDir => MountSpec::Volume {
                    source: volume.metadata.uid.clone(),
                    target: mount.path.clone(),
                },
                VolumeKind::HostPath { path } => MountSpec::Bind {
                    source: path.clone(),
                    target: mount.path.clone(),
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::pipeline::{DockerSpec, Metadata, Volume};
    use keel_core::domain::step::VolumeMount;
    use std::collections::HashMap;

    fn spec() -> PipelineSpec {
        let mut metadata = Metadata::named("pipeline");
        metadata.uid = "run-1".to_string();
        metadata.labels.insert("io.keel.run".to_string(), "1".to_string());

        let mut cache = Metadata::named("cache");
        cache.uid = "vol-cache".to_string();

        PipelineSpec {
            metadata,
            steps: Vec::new(),
            docker: Some(DockerSpec {
                volumes: vec![
                    Volume {
                        metadata: cache,
                        kind: VolumeKind::EmptyDir,
                    },
                    Volume {
                        metadata: Metadata::named("docker"),
                        kind: VolumeKind::HostPath {
                            path: "/var/run/docker.sock".to_string(),
                        },
                    },
                ],
                auths: Vec::new(),
            }),
            files: Vec::new(),
        }
    }

    fn step(docker: DockerStep) -> Step {
        let mut metadata = Metadata::named("build");
        metadata.uid = "step-1".to_string();
        metadata.labels.insert("io.keel.step".to_string(), "build".to_string());

        Step {
            metadata,
            docker: Some(docker),
            envs: HashMap::from([
                ("GOOS".to_string(), "linux".to_string()),
                ("CI".to_string(), "true".to_string()),
            ]),
            files: Vec::new(),
            volumes: vec![
                VolumeMount {
                    name: "cache".to_string(),
                    path: "/go/pkg".to_string(),
                },
                VolumeMount {
                    name: "docker".to_string(),
                    path: "/var/run/docker.sock".to_string(),
                },
                VolumeMount {
                    name: "undeclared".to_string(),
                    path: "/nowhere".to_string(),
                },
            ],
            working_dir: Some("/src".to_string()),
            resources: Default::default(),
            run_policy: Default::default(),
            detached: false,
        }
    }

    #[test]
    fn test_container_spec() {
        let spec = spec();
        let mut docker = DockerStep::new("golang:1.22");
        docker.command = vec!["/bin/sh".to_string(), "-c".to_string()];
        docker.args = vec!["go build".to_string()];
        docker.network_aliases = vec!["builder".to_string()];
        let step = step(docker.clone());

        let container = to_container_spec(&spec, &step, &docker, "docker.io/library/golang:1.22");

        assert_eq!(container.name, "step-1");
        assert_eq!(container.image, "docker.io/library/golang:1.22");
        assert_eq!(container.entrypoint, vec!["/bin/sh", "-c"]);
        assert_eq!(container.cmd, vec!["go build"]);
        assert_eq!(container.env, vec!["CI=true", "GOOS=linux"]);
        assert_eq!(container.labels["io.keel.run"], "1");
        assert_eq!(container.labels["io.keel.step"], "build");
        assert_eq!(container.working_dir.as_deref(), Some("/src"));
        assert_eq!(container.network.network, "run-1");
        assert_eq!(container.network.aliases, vec!["build", "builder"]);
    }

    #[test]
    fn test_mounts_skip_undeclared_volumes() {
        let spec = spec();
        let docker = DockerStep::new("alpine");
        let step = step(docker.clone());

        let container = to_container_spec(&spec, &step, &docker, "docker.io/library/alpine:latest");

        assert_eq!(
            container.host.mounts,
            vec![
                MountSpec::Volume {
                    source: "vol-cache".to_string(),
                    target: "/go/pkg".to_string(),
                },
                MountSpec::Bind {
                    source: "/var/run/docker.sock".to_string(),
                    target: "/var/run/docker.sock".to_string(),
                },
            ]
        );
    }
}
