//! Orchestrator seam for agent Jobs

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

/// Trait abstracting the Job operations the dispatcher needs
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    /// List Jobs in a namespace matching a label selector
    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>, kube::Error>;

    /// Create a Job in a namespace
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, kube::Error>;
}

/// Real Kubernetes implementation
pub struct KubeWorkloadApi {
    client: Client,
}

impl KubeWorkloadApi {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadApi for KubeWorkloadApi {
    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>, kube::Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let jobs = api.list(&ListParams::default().labels(selector)).await?;
        Ok(jobs.items)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, kube::Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), job).await
    }
}
