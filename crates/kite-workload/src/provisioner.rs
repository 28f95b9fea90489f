//! Agent Job submission
//!
//! Submission is a single create call. The lookup in [`crate::existence`] and
//! this create are not atomic, so two deliveries of the same event can both
//! decide to create. The API server's name uniqueness turns the loser into a
//! 409 Conflict, which is reported as [`ProvisionOutcome::AlreadyExists`].

use tracing::{info, warn};

use kite_common::Config;

use crate::api::WorkloadApi;
use crate::compiler::compile_agent_job;
use crate::error::WorkloadError;

/// HTTP status the API server returns for a duplicate name
const CONFLICT: u16 = 409;

/// Result of a submission attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The Job was created
    Created {
        /// Name of the created Job
        name: String,
    },
    /// A Job with the same name already existed
    AlreadyExists {
        /// Name of the existing Job
        name: String,
    },
}

impl ProvisionOutcome {
    /// Name of the agent Job either way
    pub fn name(&self) -> &str {
        match self {
            ProvisionOutcome::Created { name } | ProvisionOutcome::AlreadyExists { name } => name,
        }
    }
}

/// Compile and submit the agent Job for a Buildkite job
pub async fn provision<A: WorkloadApi + ?Sized>(
    api: &A,
    config: &Config,
    job_id: &str,
) -> Result<ProvisionOutcome, WorkloadError> {
    let job = compile_agent_job(job_id, config);
    let name = config.job_name(job_id);

    match api.create_job(&config.namespace, &job).await {
        Ok(_) => {
            info!(job = %job_id, name = %name, namespace = %config.namespace, "created agent job");
            Ok(ProvisionOutcome::Created { name })
        }
        Err(kube::Error::Api(ae)) if ae.code == CONFLICT => {
            warn!(
                job = %job_id,
                name = %name,
                reason = %ae.reason,
                "agent job created concurrently, treating as provisioned"
            );
            Ok(ProvisionOutcome::AlreadyExists { name })
        }
        Err(source) => Err(WorkloadError::Provisioning {
            namespace: config.namespace.clone(),
            name,
            source,
        }),
    }
}
