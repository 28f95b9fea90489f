//! "Already provisioned?" lookup
//!
//! A job counts as provisioned when at least one Job carries its UUID label.
//! Several matches still mean "exists"; duplicates are not cleaned up here.

use tracing::{debug, info};

use kite_common::JOB_ID_LABEL;

use crate::api::WorkloadApi;
use crate::error::WorkloadError;

/// Label selector matching the agent Job of a Buildkite job
pub fn job_selector(job_id: &str) -> String {
    format!("{JOB_ID_LABEL}={job_id}")
}

/// Check whether an agent Job already exists for a Buildkite job
///
/// A failed lookup is an error, never "absent": provisioning without a
/// trustworthy answer risks duplicate agents.
pub async fn workload_exists<A: WorkloadApi + ?Sized>(
    api: &A,
    namespace: &str,
    job_id: &str,
) -> Result<bool, WorkloadError> {
    let selector = job_selector(job_id);
    let jobs = api
        .list_jobs(namespace, &selector)
        .await
        .map_err(|source| WorkloadError::ExistenceCheck {
            namespace: namespace.to_string(),
            selector: selector.clone(),
            source,
        })?;

    if jobs.is_empty() {
        debug!(job = %job_id, namespace, "no agent job found");
        return Ok(false);
    }

    let names: Vec<&str> = jobs
        .iter()
        .filter_map(|j| j.metadata.name.as_deref())
        .collect();
    info!(job = %job_id, namespace, matches = ?names, "agent job already exists");
    Ok(true)
}
