//! Top-level invocation errors

use kite_common::{ConfigError, EventError};
use kite_eks::EksError;
use kite_workload::WorkloadError;
use thiserror::Error;

/// Any failure that aborts an invocation
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Configuration was incomplete; raised before any network call
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The event could not be decoded
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// Cluster lookup, authentication or client construction failed
    #[error(transparent)]
    Eks(#[from] EksError),

    /// The existence check or the create call failed
    #[error(transparent)]
    Workload(#[from] WorkloadError),
}

impl DispatchError {
    /// Check if redelivering the same event could succeed
    ///
    /// Configuration and event errors will fail identically on every
    /// redelivery; everything else is transient and idempotent to repeat.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Config(_) => false,
            DispatchError::Event(_) => false,
            DispatchError::Eks(e) => e.is_retryable(),
            DispatchError::Workload(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_eks::LookupFailure;

    #[test]
    fn config_and_event_errors_are_permanent() {
        let err = DispatchError::from(ConfigError::Missing { key: "cluster" });
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("'cluster'"));

        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!DispatchError::from(EventError::Decode(decode)).is_retryable());
    }

    #[test]
    fn cluster_errors_are_transient() {
        let err = DispatchError::from(EksError::lookup(
            "ci",
            LookupFailure::Unavailable,
            "try later",
        ));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[unavailable]"));
    }
}
