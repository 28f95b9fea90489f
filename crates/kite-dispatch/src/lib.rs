//! kite-dispatch - one Buildkite agent Job per scheduled job
//!
//! [`ProvisioningCore`] handles a single decoded job event: it checks that the
//! job targets the dynamic queue, resolves and authenticates to the EKS
//! cluster, and creates the agent Job unless one already exists.

pub mod error;
pub mod handler;

pub use error::DispatchError;
pub use handler::{ClusterConnector, InvocationOutcome, KubeConnector, ProvisioningCore};
