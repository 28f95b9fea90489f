//! Cluster discovery through the EKS control plane

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_eks::error::SdkError;
use aws_sdk_eks::operation::describe_cluster::DescribeClusterError;
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::{EksError, LookupFailure};

/// Raw cluster data as returned by the control plane
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterDescription {
    /// Cluster name
    pub name: String,
    /// API server endpoint URL
    pub endpoint: String,
    /// Base64-encoded PEM bundle of the cluster CA
    pub certificate_authority: String,
}

/// Everything needed to authenticate against and connect to a cluster
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterDescriptor {
    /// Cluster name, also the audience of minted tokens
    pub name: String,
    /// API server endpoint URL
    pub endpoint: String,
    /// Decoded PEM bundle of the cluster CA
    pub trust_root: Vec<u8>,
    /// IAM role assumed when minting tokens
    pub role_arn: String,
}

/// Trait abstracting the cloud control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Describe a cluster by name
    async fn describe_cluster(&self, name: &str) -> Result<ClusterDescription, EksError>;
}

/// Real control plane backed by the EKS API
pub struct EksControlPlane {
    client: aws_sdk_eks::Client,
}

impl EksControlPlane {
    /// Create a control plane client from shared SDK configuration
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_eks::Client::new(config),
        }
    }
}

#[async_trait]
impl ControlPlane for EksControlPlane {
    async fn describe_cluster(&self, name: &str) -> Result<ClusterDescription, EksError> {
        let output = match self.client.describe_cluster().name(name).send().await {
            Ok(output) => output,
            Err(err) => {
                let kind = classify(&err);
                warn!(cluster = %name, %kind, error = ?err, "DescribeCluster failed");
                return Err(EksError::lookup(name, kind, err.to_string()));
            }
        };

        let missing = |field: &str| {
            EksError::lookup(
                name,
                LookupFailure::InvalidResponse,
                format!("DescribeCluster response has no {field}"),
            )
        };

        let cluster = output.cluster().ok_or_else(|| missing("cluster"))?;
        let endpoint = cluster.endpoint().ok_or_else(|| missing("endpoint"))?;
        let certificate_authority = cluster
            .certificate_authority()
            .and_then(|ca| ca.data())
            .ok_or_else(|| missing("certificate authority data"))?;

        Ok(ClusterDescription {
            name: cluster.name().unwrap_or(name).to_string(),
            endpoint: endpoint.to_string(),
            certificate_authority: certificate_authority.to_string(),
        })
    }
}

fn classify(err: &SdkError<DescribeClusterError>) -> LookupFailure {
    match err {
        SdkError::ServiceError(service) => match service.err() {
            DescribeClusterError::ResourceNotFoundException(_) => LookupFailure::NotFound,
            DescribeClusterError::ClientException(_) => LookupFailure::Client,
            DescribeClusterError::ServerException(_) => LookupFailure::Server,
            DescribeClusterError::ServiceUnavailableException(_) => LookupFailure::Unavailable,
            _ => LookupFailure::Other,
        },
        _ => LookupFailure::Other,
    }
}

/// Resolve a cluster into a descriptor ready for authentication
///
/// The CA bundle arrives base64-encoded and is decoded here; a bundle that
/// does not decode is a lookup failure like any other.
pub async fn resolve_cluster<C: ControlPlane + ?Sized>(
    control_plane: &C,
    name: &str,
    role_arn: &str,
) -> Result<ClusterDescriptor, EksError> {
    let description = control_plane.describe_cluster(name).await?;

    let trust_root = STANDARD
        .decode(description.certificate_authority.trim())
        .map_err(|e| {
            EksError::lookup(
                name,
                LookupFailure::InvalidResponse,
                format!("certificate authority is not valid base64: {e}"),
            )
        })?;

    debug!(cluster = %description.name, endpoint = %description.endpoint, "resolved cluster");

    Ok(ClusterDescriptor {
        name: description.name,
        endpoint: description.endpoint,
        trust_root,
        role_arn: role_arn.to_string(),
    })
}
