//! EKS plumbing for kite-dispatch
//!
//! Everything needed to go from a cluster name to an authenticated kube client:
//! - [`descriptor`]: endpoint and CA discovery through the EKS control plane
//! - [`token`]: IAM-federated bearer tokens (presigned STS `GetCallerIdentity`)
//! - [`client`]: kube client construction from the two

pub mod client;
pub mod descriptor;
pub mod error;
pub mod token;

pub use client::build_client;
pub use descriptor::{resolve_cluster, ClusterDescriptor, ControlPlane, EksControlPlane};
pub use error::{EksError, LookupFailure};
pub use token::{AuthToken, Authenticator, IamAuthenticator};

use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Load the shared AWS SDK configuration
///
/// An explicit region wins; otherwise the SDK's ambient region chain applies.
pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    loader.load().await
}
