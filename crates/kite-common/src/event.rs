//! Inbound "job scheduled" events
//!
//! Buildkite publishes job events to EventBridge. Only the job UUID matters for
//! idempotency; the build, pipeline and organization fields exist for logging.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::{Config, MAX_NAME_LEN};

/// Errors raised while decoding an inbound event
#[derive(Debug, Error)]
pub enum EventError {
    /// The payload was not a valid event document
    #[error("failed to decode event: {0}")]
    Decode(#[from] serde_json::Error),

    /// The job UUID cannot be used as a label value or name suffix
    #[error("invalid job identity '{job_id}': {reason}")]
    InvalidJobId {
        /// The offending identity
        job_id: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Prefix plus job UUID exceeds the Kubernetes name limit
    #[error("job name '{name}' is {len} characters, longer than 63")]
    JobNameTooLong {
        /// The name that would have been submitted
        name: String,
        /// Its length
        len: usize,
    },
}

/// A decoded Buildkite job event
#[derive(Clone, Debug, PartialEq)]
pub struct JobEvent {
    /// EventBridge event id
    pub id: String,
    /// Time the event was emitted
    pub time: Option<DateTime<Utc>>,
    /// EventBridge detail type, e.g. "Job Scheduled"
    pub detail_type: String,
    /// Buildkite job UUID, the sole idempotency key
    pub job_id: String,
    /// Agent query rules of the job, e.g. `queue=dynamic`
    pub agent_query_rules: Vec<String>,
    /// Build number
    pub build_number: Option<u64>,
    /// Commit being built
    pub commit: Option<String>,
    /// Pipeline slug
    pub pipeline: Option<String>,
    /// Organization slug
    pub organization: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(rename = "detail-type", default)]
    detail_type: String,
    detail: Detail,
}

#[derive(Deserialize)]
struct Detail {
    job: JobDetail,
    #[serde(default)]
    build: Option<BuildDetail>,
    #[serde(default)]
    pipeline: Option<Slug>,
    #[serde(default)]
    organization: Option<Slug>,
}

#[derive(Deserialize)]
struct JobDetail {
    uuid: String,
    #[serde(default)]
    agent_query_rules: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct BuildDetail {
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    commit: Option<String>,
}

#[derive(Deserialize)]
struct Slug {
    slug: String,
}

impl JobEvent {
    /// Decode and validate an EventBridge JSON document
    pub fn from_json(payload: &str) -> Result<Self, EventError> {
        let envelope: Envelope = serde_json::from_str(payload)?;
        validate_job_id(&envelope.detail.job.uuid)?;

        let Detail {
            job,
            build,
            pipeline,
            organization,
        } = envelope.detail;
        let (build_number, commit) = build
            .map(|b| (b.number, b.commit))
            .unwrap_or_default();

        Ok(Self {
            id: envelope.id,
            time: envelope.time,
            detail_type: envelope.detail_type,
            job_id: job.uuid,
            agent_query_rules: job.agent_query_rules.unwrap_or_default(),
            build_number,
            commit,
            pipeline: pipeline.map(|p| p.slug),
            organization: organization.map(|o| o.slug),
        })
    }

    /// Whether the job asked for the given agent query rule
    pub fn requests(&self, rule: &str) -> bool {
        self.agent_query_rules.iter().any(|r| r == rule)
    }

    /// Name of the agent Job for this event under the given configuration
    ///
    /// Fails when the prefixed name no longer fits a DNS-1123 label.
    pub fn job_name(&self, config: &Config) -> Result<String, EventError> {
        let name = config.job_name(&self.job_id);
        if name.len() > MAX_NAME_LEN {
            return Err(EventError::JobNameTooLong {
                len: name.len(),
                name,
            });
        }
        Ok(name)
    }
}

/// Check that a job identity is a DNS-1123 label, usable both as a label
/// value and as the suffix of a Job name
fn validate_job_id(job_id: &str) -> Result<(), EventError> {
    let invalid = |reason| EventError::InvalidJobId {
        job_id: job_id.to_string(),
        reason,
    };

    if job_id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if job_id.len() > MAX_NAME_LEN {
        return Err(invalid("must be at most 63 characters"));
    }
    if !job_id.chars().all(is_dns_label_char) {
        return Err(invalid("may only contain lowercase alphanumerics and '-'"));
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c != '-');
    if !edge_ok(job_id.chars().next()) || !edge_ok(job_id.chars().last()) {
        return Err(invalid("must start and end with an alphanumeric character"));
    }
    Ok(())
}

pub(crate) fn is_dns_label_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}
