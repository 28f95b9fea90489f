//! EKS-specific error types

use std::fmt;

use thiserror::Error;

/// Why a cluster lookup failed. Used for diagnostics only; every kind is
/// handled the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupFailure {
    /// The cluster does not exist
    NotFound,
    /// The control plane rejected the request
    Client,
    /// The control plane failed internally
    Server,
    /// The control plane is unavailable
    Unavailable,
    /// The response was missing fields or the CA could not be decoded
    InvalidResponse,
    /// Transport, credential or otherwise unclassified SDK failure
    Other,
}

impl fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LookupFailure::NotFound => "not-found",
            LookupFailure::Client => "client-error",
            LookupFailure::Server => "server-error",
            LookupFailure::Unavailable => "unavailable",
            LookupFailure::InvalidResponse => "invalid-response",
            LookupFailure::Other => "other",
        };
        f.write_str(s)
    }
}

/// Errors raised while reaching an EKS cluster
#[derive(Debug, Error)]
pub enum EksError {
    /// DescribeCluster failed or returned unusable data
    #[error("cluster lookup failed for {cluster} [{kind}]: {message}")]
    ClusterLookup {
        /// Cluster name
        cluster: String,
        /// Failure classification
        kind: LookupFailure,
        /// Description of what failed
        message: String,
    },

    /// No bearer token could be minted
    #[error("authentication failed for {cluster}: {message}")]
    Auth {
        /// Cluster name
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// The kube client could not be built from the descriptor
    #[error("client construction failed for {cluster}: {message}")]
    ClientConstruction {
        /// Cluster name
        cluster: String,
        /// Description of what failed
        message: String,
    },
}

impl EksError {
    /// Create a cluster lookup error
    pub fn lookup(
        cluster: impl Into<String>,
        kind: LookupFailure,
        msg: impl Into<String>,
    ) -> Self {
        Self::ClusterLookup {
            cluster: cluster.into(),
            kind,
            message: msg.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Auth {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a client construction error
    pub fn client_construction(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ClientConstruction {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Check if the invocation may be retried
    ///
    /// Every variant is: each invocation re-resolves the cluster and re-mints
    /// the token, so a redelivered event starts from scratch.
    pub fn is_retryable(&self) -> bool {
        match self {
            EksError::ClusterLookup { .. } => true,
            EksError::Auth { .. } => true,
            EksError::ClientConstruction { .. } => true,
        }
    }
}
