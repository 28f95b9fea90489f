//! Common types for kite-dispatch: configuration, inbound events, telemetry

#![deny(missing_docs)]

pub mod config;
pub mod event;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use event::{EventError, JobEvent};

/// Label key carrying the Buildkite job UUID on every agent Job
pub const JOB_ID_LABEL: &str = "buildkite-job-id";

/// Maximum length of a Job name, which must be a DNS-1123 label
pub const MAX_NAME_LEN: usize = 63;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "buildkite";

/// Job name prefix used when none is configured
pub const DEFAULT_NAME_PREFIX: &str = "buildkite-agent-";

/// Agent image used when none is configured
pub const DEFAULT_IMAGE: &str = "buildkite/agent";

/// Agent query rule that marks a job as ours to provision
pub const DEFAULT_ELIGIBILITY_RULE: &str = "queue=dynamic";
