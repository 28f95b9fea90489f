//! Buildkite agent workloads
//!
//! Compiles a job UUID into a batch/v1 `Job` that runs one Buildkite agent with
//! a Docker-in-Docker sidecar, and submits it at most once:
//! - [`compiler`]: deterministic Job construction
//! - [`api`]: the orchestrator seam (`list` / `create`)
//! - [`existence`]: label lookup deciding "already provisioned"
//! - [`provisioner`]: conflict-tolerant submission

pub mod api;
pub mod compiler;
pub mod error;
pub mod existence;
pub mod provisioner;

pub use api::{KubeWorkloadApi, WorkloadApi};
pub use compiler::compile_agent_job;
pub use error::WorkloadError;
pub use existence::{job_selector, workload_exists};
pub use provisioner::{provision, ProvisionOutcome};
