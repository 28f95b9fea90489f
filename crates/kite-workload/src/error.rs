//! Workload-specific error types

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("failed to list jobs matching '{selector}' in {namespace}: {source}")]
    ExistenceCheck {
        namespace: String,
        selector: String,
        source: kube::Error,
    },

    #[error("failed to create job {name} in {namespace}: {source}")]
    Provisioning {
        namespace: String,
        name: String,
        source: kube::Error,
    },
}

impl WorkloadError {
    /// Check if the invocation may be retried
    ///
    /// Both are safe to retry: a failed lookup never provisions, and a failed
    /// create is caught by the lookup or by a conflict on the next attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkloadError::ExistenceCheck { .. } => true,
            WorkloadError::Provisioning { .. } => true,
        }
    }
}
