//! Agent Job compilation
//!
//! Maps a Buildkite job UUID plus static configuration to a batch/v1 `Job`.
//! The output depends on nothing else, so the same job always compiles to
//! byte-identical JSON and a duplicate submission shows up as a name conflict.
//!
//! Pod layout:
//! - `buildkite-agent-exposer` (init): copies the agent binary into a shared emptyDir
//! - `buildkite-agent`: privileged agent acquiring exactly this job
//! - `docker-dind`: privileged Docker daemon the agent talks to over localhost

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, HostPathVolumeSource, PodSpec,
    PodTemplateSpec, ResourceRequirements, SecretKeySelector, SecretVolumeSource,
    SecurityContext, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use kite_common::{Config, JOB_ID_LABEL};

/// Whole-Job deadline: one 30 minute agent run, one retry
pub const JOB_DEADLINE_SECONDS: i64 = 3600;
/// Deadline for a single agent pod
pub const POD_DEADLINE_SECONDS: i64 = 1800;
/// Grace period for an agent to finish its current step on termination
pub const TERMINATION_GRACE_SECONDS: i64 = 600;
/// Pod retries after the first failure
pub const BACKOFF_LIMIT: i32 = 1;
/// Finished Jobs are garbage-collected after this long
pub const TTL_AFTER_FINISHED_SECONDS: i32 = 600;

/// Taint key / node label key reserving nodes for agents
pub const WORKLOAD_CLASS_KEY: &str = "workloads";
/// Taint value / node label value reserving nodes for agents
pub const WORKLOAD_CLASS_VALUE: &str = "buildkite";

/// Docker-in-Docker sidecar image
pub const DIND_IMAGE: &str = "docker:18.09-dind";
/// CPU reserved for the Docker daemon
pub const DIND_CPU_REQUEST: &str = "1250m";
/// Memory reserved for the Docker daemon
pub const DIND_MEMORY_REQUEST: &str = "6144Mi";

/// Secret holding the agent registration token under key `token`
pub const AGENT_TOKEN_SECRET: &str = "buildkite-agent-token";
/// Secret holding extra environment for builds
pub const ENV_VARS_SECRET: &str = "buildkite-env-vars";
/// Secret holding `.git-credentials`
pub const GIT_CREDENTIALS_SECRET: &str = "buildkite-agent-git-credentials";

const AGENT_CONTAINER: &str = "buildkite-agent";
const EXPOSER_CONTAINER: &str = "buildkite-agent-exposer";
const DIND_CONTAINER: &str = "docker-dind";

const AGENT_VOLUME: &str = "buildkite-agent";
const AGENT_MOUNT_PATH: &str = "/buildkite-agent";
const BUILDS_VOLUME: &str = "buildkite-builds";
const BUILDS_MOUNT_PATH: &str = "/buildkite-builds";
const BUILDS_HOST_PATH: &str = "/buildkite/builds";
const GIT_CREDENTIALS_VOLUME: &str = "git-credentials";

/// Owner read-only (0400)
const GIT_CREDENTIALS_MODE: i32 = 0o400;

/// Keys copied from the build environment secret into the agent
const ENV_SECRET_KEYS: [&str; 3] = ["GITHUB_TOKEN", "DOCKER_LOGIN_USER", "DOCKER_LOGIN_PASSWORD"];

/// Compile the agent Job for a Buildkite job UUID
pub fn compile_agent_job(job_id: &str, config: &Config) -> Job {
    let labels = BTreeMap::from([(JOB_ID_LABEL.to_string(), job_id.to_string())]);

    Job {
        metadata: ObjectMeta {
            name: Some(config.job_name(job_id)),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            active_deadline_seconds: Some(JOB_DEADLINE_SECONDS),
            backoff_limit: Some(BACKOFF_LIMIT),
            ttl_seconds_after_finished: Some(TTL_AFTER_FINISHED_SECONDS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec(job_id, &config.image)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_spec(job_id: &str, image: &str) -> PodSpec {
    PodSpec {
        tolerations: Some(vec![Toleration {
            key: Some(WORKLOAD_CLASS_KEY.to_string()),
            operator: Some("Equal".to_string()),
            value: Some(WORKLOAD_CLASS_VALUE.to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        }]),
        node_selector: Some(BTreeMap::from([(
            WORKLOAD_CLASS_KEY.to_string(),
            WORKLOAD_CLASS_VALUE.to_string(),
        )])),
        restart_policy: Some("Never".to_string()),
        active_deadline_seconds: Some(POD_DEADLINE_SECONDS),
        termination_grace_period_seconds: Some(TERMINATION_GRACE_SECONDS),
        init_containers: Some(vec![exposer_container(image)]),
        containers: vec![agent_container(job_id, image), dind_container()],
        volumes: Some(volumes()),
        ..Default::default()
    }
}

fn exposer_container(image: &str) -> Container {
    Container {
        name: EXPOSER_CONTAINER.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![format!(
            "cp /usr/local/bin/buildkite-agent {AGENT_MOUNT_PATH}/buildkite-agent"
        )]),
        volume_mounts: Some(vec![mount(AGENT_VOLUME, AGENT_MOUNT_PATH)]),
        ..Default::default()
    }
}

fn agent_container(job_id: &str, image: &str) -> Container {
    let mut env = vec![
        plain_env("BUILDKITE_AGENT_ACQUIRE_JOB", job_id),
        plain_env("DOCKER_HOST", "tcp://localhost:2375"),
        secret_env("BUILDKITE_AGENT_TOKEN", AGENT_TOKEN_SECRET, "token"),
    ];
    env.extend(
        ENV_SECRET_KEYS
            .iter()
            .map(|key| secret_env(key, ENV_VARS_SECRET, key)),
    );

    Container {
        name: AGENT_CONTAINER.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        security_context: Some(privileged()),
        env: Some(env),
        volume_mounts: Some(vec![
            VolumeMount {
                name: GIT_CREDENTIALS_VOLUME.to_string(),
                mount_path: "/root/.git-credentials".to_string(),
                sub_path: Some(".git-credentials".to_string()),
                ..Default::default()
            },
            mount(AGENT_VOLUME, AGENT_MOUNT_PATH),
            mount(BUILDS_VOLUME, BUILDS_MOUNT_PATH),
        ]),
        ..Default::default()
    }
}

fn dind_container() -> Container {
    Container {
        name: DIND_CONTAINER.to_string(),
        image: Some(DIND_IMAGE.to_string()),
        image_pull_policy: Some("Always".to_string()),
        security_context: Some(privileged()),
        volume_mounts: Some(vec![
            mount(AGENT_VOLUME, AGENT_MOUNT_PATH),
            mount(BUILDS_VOLUME, BUILDS_MOUNT_PATH),
        ]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(DIND_CPU_REQUEST.to_string())),
                ("memory".to_string(), Quantity(DIND_MEMORY_REQUEST.to_string())),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volumes() -> Vec<Volume> {
    vec![
        Volume {
            name: BUILDS_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: BUILDS_HOST_PATH.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: AGENT_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: GIT_CREDENTIALS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(GIT_CREDENTIALS_SECRET.to_string()),
                default_mode: Some(GIT_CREDENTIALS_MODE),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

fn privileged() -> SecurityContext {
    SecurityContext {
        privileged: Some(true),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn plain_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
