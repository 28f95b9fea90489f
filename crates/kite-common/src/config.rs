//! Dispatcher configuration
//!
//! The configuration is resolved once at the process boundary and then passed
//! by reference into every component. Nothing below the binary reads the
//! environment directly.

use secrecy::SecretString;
use thiserror::Error;

use crate::event::is_dns_label_char;
use crate::{
    DEFAULT_ELIGIBILITY_RULE, DEFAULT_IMAGE, DEFAULT_NAMESPACE, DEFAULT_NAME_PREFIX, MAX_NAME_LEN,
};

/// Environment key for the EKS cluster name
pub const ENV_CLUSTER: &str = "cluster";
/// Environment key for the IAM role ARN assumed to talk to the cluster
pub const ENV_ROLE_ARN: &str = "arn";
/// Environment key for the AWS region of the cluster
pub const ENV_REGION: &str = "region";
/// Region exposed by the hosting runtime, used when `region` is unset
pub const ENV_AWS_REGION: &str = "AWS_REGION";
/// Environment key for the Buildkite API token
pub const ENV_BUILDKITE_TOKEN: &str = "buildkite_token";
/// Environment key for the target namespace
pub const ENV_NAMESPACE: &str = "namespace";
/// Environment key for the Job name prefix
pub const ENV_POD_PREFIX: &str = "pod_prefix";
/// Environment key for the agent image
pub const ENV_IMAGE: &str = "image";
/// Environment key for the eligibility rule
pub const ENV_AGENT_QUERY_RULE: &str = "agent_query_rule";

/// Errors raised while resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key was unset or empty
    #[error("missing required configuration key '{key}'")]
    Missing {
        /// The environment key that was missing
        key: &'static str,
    },

    /// A key was set to a value that can never work
    #[error("invalid value for configuration key '{key}': {reason}")]
    Invalid {
        /// The offending environment key
        key: &'static str,
        /// Why it was rejected
        reason: &'static str,
    },
}

/// Resolved configuration for one dispatcher process
#[derive(Debug)]
pub struct Config {
    /// EKS cluster name
    pub cluster: String,
    /// IAM role ARN assumed when minting cluster tokens
    pub role_arn: String,
    /// AWS region; `None` defers to the SDK's ambient region chain
    pub region: Option<String>,
    /// Buildkite API token. Held for completeness; never logged.
    pub buildkite_token: SecretString,
    /// Namespace agent Jobs are created in
    pub namespace: String,
    /// Prefix prepended to the job UUID to name the agent Job
    pub name_prefix: String,
    /// Image for the agent and exposer containers
    pub image: String,
    /// Agent query rule an event must carry to be provisioned
    pub eligibility_rule: String,
}

impl Config {
    /// Resolve configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary key lookup
    ///
    /// Empty values are treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing { key });

        let cluster = require(ENV_CLUSTER)?;
        let role_arn = require(ENV_ROLE_ARN)?;
        let region = get(ENV_REGION).or_else(|| get(ENV_AWS_REGION));
        let buildkite_token = SecretString::from(require(ENV_BUILDKITE_TOKEN)?);
        let name_prefix = get(ENV_POD_PREFIX).unwrap_or_else(|| DEFAULT_NAME_PREFIX.to_string());
        validate_name_prefix(&name_prefix)?;

        Ok(Self {
            cluster,
            role_arn,
            region,
            buildkite_token,
            namespace: get(ENV_NAMESPACE).unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            name_prefix,
            image: get(ENV_IMAGE).unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            eligibility_rule: get(ENV_AGENT_QUERY_RULE)
                .unwrap_or_else(|| DEFAULT_ELIGIBILITY_RULE.to_string()),
        })
    }

    /// Build a configuration with every optional key at its default
    pub fn new(
        cluster: impl Into<String>,
        role_arn: impl Into<String>,
        buildkite_token: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            role_arn: role_arn.into(),
            region: None,
            buildkite_token: SecretString::from(buildkite_token.into()),
            namespace: DEFAULT_NAMESPACE.to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            eligibility_rule: DEFAULT_ELIGIBILITY_RULE.to_string(),
        }
    }

    /// Set the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the agent image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Name of the agent Job for a Buildkite job UUID
    pub fn job_name(&self, job_id: &str) -> String {
        format!("{}{}", self.name_prefix, job_id)
    }
}

/// A prefix must leave room for at least one identity character and keep the
/// Job name a DNS-1123 label
fn validate_name_prefix(prefix: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::Invalid {
        key: ENV_POD_PREFIX,
        reason,
    };

    if prefix.len() >= MAX_NAME_LEN {
        return Err(invalid("must be shorter than 63 characters"));
    }
    if !prefix.chars().all(is_dns_label_char) {
        return Err(invalid("may only contain lowercase alphanumerics and '-'"));
    }
    if prefix.starts_with('-') {
        return Err(invalid("must start with an alphanumeric character"));
    }
    Ok(())
}
