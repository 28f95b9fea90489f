//! Provisioning core
//!
//! One invocation walks a linear state machine:
//! Start → DescriptorResolved → Authenticated → ClientReady → ExistenceChecked
//! → Provisioned | Skipped → End
//!
//! Ineligible events go straight to End before any network call. Any failed
//! transition aborts the invocation with that component's error. Nothing is
//! cached between invocations: every event re-resolves the cluster and mints a
//! fresh token.

use std::sync::Arc;

use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use kite_common::{Config, JobEvent};
use kite_eks::{
    build_client, load_sdk_config, resolve_cluster, AuthToken, Authenticator, ClusterDescriptor,
    ControlPlane, EksControlPlane, EksError, IamAuthenticator,
};
use kite_workload::{provision, workload_exists, KubeWorkloadApi, ProvisionOutcome, WorkloadApi};

use crate::error::DispatchError;

/// How an invocation ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The job does not target this dispatcher's queue
    Ineligible,
    /// An agent Job for the job already existed
    Skipped,
    /// A new agent Job was created
    Provisioned {
        /// Name of the created Job
        name: String,
    },
    /// A concurrent invocation created the Job between lookup and create
    RaceLost {
        /// Name of the existing Job
        name: String,
    },
}

/// Trait abstracting client construction for a resolved, authenticated cluster
#[cfg_attr(test, automock)]
pub trait ClusterConnector: Send + Sync {
    /// Build a Job API bound to the cluster and namespace
    fn connect(
        &self,
        cluster: &ClusterDescriptor,
        token: &AuthToken,
        namespace: &str,
    ) -> Result<Box<dyn WorkloadApi>, EksError>;
}

/// Real connector producing kube-backed Job APIs
pub struct KubeConnector;

impl ClusterConnector for KubeConnector {
    fn connect(
        &self,
        cluster: &ClusterDescriptor,
        token: &AuthToken,
        namespace: &str,
    ) -> Result<Box<dyn WorkloadApi>, EksError> {
        let client = build_client(cluster, token, namespace)?;
        Ok(Box::new(KubeWorkloadApi::new(client)))
    }
}

/// Handles job events against one configured cluster
pub struct ProvisioningCore {
    config: Config,
    control_plane: Arc<dyn ControlPlane>,
    authenticator: Arc<dyn Authenticator>,
    connector: Arc<dyn ClusterConnector>,
}

impl ProvisioningCore {
    /// Create a core from explicit collaborators
    pub fn new(
        config: Config,
        control_plane: Arc<dyn ControlPlane>,
        authenticator: Arc<dyn Authenticator>,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        Self {
            config,
            control_plane,
            authenticator,
            connector,
        }
    }

    /// Create a core wired to EKS, STS and the Kubernetes API
    ///
    /// Loads the AWS SDK configuration but makes no network calls.
    pub async fn from_config(config: Config) -> Self {
        let sdk_config = load_sdk_config(config.region.as_deref()).await;
        Self::new(
            config,
            Arc::new(EksControlPlane::new(&sdk_config)),
            Arc::new(IamAuthenticator::new(sdk_config)),
            Arc::new(KubeConnector),
        )
    }

    /// Handle one job event
    #[instrument(
        skip(self, event),
        fields(event_id = %event.id, job = %event.job_id, cluster = %self.config.cluster)
    )]
    pub async fn handle(&self, event: &JobEvent) -> Result<InvocationOutcome, DispatchError> {
        if !event.requests(&self.config.eligibility_rule) {
            info!(
                rules = ?event.agent_query_rules,
                wanted = %self.config.eligibility_rule,
                "job does not target this queue, ignoring"
            );
            return Ok(InvocationOutcome::Ineligible);
        }

        let job_name = event.job_name(&self.config)?;

        info!(
            pipeline = event.pipeline.as_deref().unwrap_or_default(),
            organization = event.organization.as_deref().unwrap_or_default(),
            build = ?event.build_number,
            commit = event.commit.as_deref().unwrap_or_default(),
            job_name = %job_name,
            "handling scheduled job"
        );

        let cluster = resolve_cluster(
            self.control_plane.as_ref(),
            &self.config.cluster,
            &self.config.role_arn,
        )
        .await?;
        info!(endpoint = %cluster.endpoint, "descriptor resolved");

        let token = self.authenticator.token(&cluster).await?;
        debug!("authenticated");

        let api = self
            .connector
            .connect(&cluster, &token, &self.config.namespace)?;
        debug!(namespace = %self.config.namespace, "client ready");

        if workload_exists(api.as_ref(), &self.config.namespace, &event.job_id).await? {
            return Ok(InvocationOutcome::Skipped);
        }

        let outcome = match provision(api.as_ref(), &self.config, &event.job_id).await? {
            ProvisionOutcome::Created { name } => InvocationOutcome::Provisioned { name },
            ProvisionOutcome::AlreadyExists { name } => InvocationOutcome::RaceLost { name },
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use k8s_openapi::api::batch::v1::Job;
    use kite_eks::descriptor::ClusterDescription;
    use kite_eks::LookupFailure;
    use kite_workload::WorkloadError;
    use mockall::mock;
    use mockall::predicate::*;

    // Local mocks: the automock-generated ones are private to their crates
    mock! {
        pub ControlPlane {}

        #[async_trait]
        impl ControlPlane for ControlPlane {
            async fn describe_cluster(&self, name: &str) -> Result<ClusterDescription, EksError>;
        }
    }

    mock! {
        pub Authenticator {}

        #[async_trait]
        impl Authenticator for Authenticator {
            async fn token(&self, cluster: &ClusterDescriptor) -> Result<AuthToken, EksError>;
        }
    }

    mock! {
        pub WorkloadApi {}

        #[async_trait]
        impl WorkloadApi for WorkloadApi {
            async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>, kube::Error>;
            async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, kube::Error>;
        }
    }

    // "-----BEGIN CERTIFICATE-----" is enough for resolution; the connector is mocked
    const CA_B64: &str = "LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t";

    fn config() -> Config {
        Config::new("ci", "arn:aws:iam::123456789012:role/ci", "bk-token")
    }

    fn event(rules: &[&str]) -> JobEvent {
        JobEvent {
            id: "evt-1".to_string(),
            time: None,
            detail_type: "Job Scheduled".to_string(),
            job_id: "abc-123".to_string(),
            agent_query_rules: rules.iter().map(|r| r.to_string()).collect(),
            build_number: Some(7),
            commit: Some("deadbeef".to_string()),
            pipeline: Some("widgets".to_string()),
            organization: Some("acme".to_string()),
        }
    }

    fn healthy_control_plane() -> MockControlPlane {
        let mut control_plane = MockControlPlane::new();
        control_plane
            .expect_describe_cluster()
            .with(eq("ci"))
            .times(1)
            .returning(|name| {
                Ok(ClusterDescription {
                    name: name.to_string(),
                    endpoint: "https://example.eks.amazonaws.com".to_string(),
                    certificate_authority: CA_B64.to_string(),
                })
            });
        control_plane
    }

    fn healthy_authenticator() -> MockAuthenticator {
        let mut authenticator = MockAuthenticator::new();
        authenticator
            .expect_token()
            .withf(|cluster| {
                cluster.name == "ci" && cluster.role_arn == "arn:aws:iam::123456789012:role/ci"
            })
            .times(1)
            .returning(|_| Ok(AuthToken::new("k8s-aws-v1.test")));
        authenticator
    }

    fn connector_for(api: MockWorkloadApi) -> MockClusterConnector {
        let api: Box<dyn WorkloadApi> = Box::new(api);
        let mut connector = MockClusterConnector::new();
        connector
            .expect_connect()
            .withf(|_, token, namespace| {
                token.expose() == "k8s-aws-v1.test" && namespace == "buildkite"
            })
            .times(1)
            .return_once(move |_, _, _| Ok(api));
        connector
    }

    fn core(
        control_plane: MockControlPlane,
        authenticator: MockAuthenticator,
        connector: MockClusterConnector,
    ) -> ProvisioningCore {
        ProvisioningCore::new(
            config(),
            Arc::new(control_plane),
            Arc::new(authenticator),
            Arc::new(connector),
        )
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: reason.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    mod eligibility {
        use super::*;

        #[tokio::test]
        async fn other_queues_touch_nothing() {
            // Mocks without expectations panic on any call
            let core = core(
                MockControlPlane::new(),
                MockAuthenticator::new(),
                MockClusterConnector::new(),
            );

            let outcome = core.handle(&event(&["queue=static"])).await.unwrap();
            assert_eq!(outcome, InvocationOutcome::Ineligible);
        }

        #[tokio::test]
        async fn empty_rules_are_ineligible() {
            let core = core(
                MockControlPlane::new(),
                MockAuthenticator::new(),
                MockClusterConnector::new(),
            );
            assert_eq!(
                core.handle(&event(&[])).await.unwrap(),
                InvocationOutcome::Ineligible
            );
        }

        #[tokio::test]
        async fn rule_may_appear_anywhere_in_the_list() {
            let mut api = MockWorkloadApi::new();
            api.expect_list_jobs().returning(|_, _| Ok(vec![Job::default()]));

            let core = core(
                healthy_control_plane(),
                healthy_authenticator(),
                connector_for(api),
            );
            let outcome = core
                .handle(&event(&["os=linux", "queue=dynamic"]))
                .await
                .unwrap();
            assert_eq!(outcome, InvocationOutcome::Skipped);
        }
    }

    mod provisioning {
        use super::*;

        #[tokio::test]
        async fn absent_job_is_created() {
            let mut api = MockWorkloadApi::new();
            api.expect_list_jobs()
                .with(eq("buildkite"), eq("buildkite-job-id=abc-123"))
                .times(1)
                .returning(|_, _| Ok(vec![]));
            api.expect_create_job()
                .times(1)
                .returning(|_, job| Ok(job.clone()));

            let core = core(
                healthy_control_plane(),
                healthy_authenticator(),
                connector_for(api),
            );

            let outcome = core.handle(&event(&["queue=dynamic"])).await.unwrap();
            assert_eq!(
                outcome,
                InvocationOutcome::Provisioned {
                    name: "buildkite-agent-abc-123".to_string()
                }
            );
        }

        #[tokio::test]
        async fn existing_job_is_skipped_without_create() {
            let mut api = MockWorkloadApi::new();
            api.expect_list_jobs()
                .times(1)
                .returning(|_, _| Ok(vec![Job::default()]));
            api.expect_create_job().never();

            let core = core(
                healthy_control_plane(),
                healthy_authenticator(),
                connector_for(api),
            );
            assert_eq!(
                core.handle(&event(&["queue=dynamic"])).await.unwrap(),
                InvocationOutcome::Skipped
            );
        }

        #[tokio::test]
        async fn conflict_on_create_completes_successfully() {
            let mut api = MockWorkloadApi::new();
            api.expect_list_jobs().returning(|_, _| Ok(vec![]));
            api.expect_create_job()
                .times(1)
                .returning(|_, _| Err(api_error(409, "AlreadyExists")));

            let core = core(
                healthy_control_plane(),
                healthy_authenticator(),
                connector_for(api),
            );
            assert_eq!(
                core.handle(&event(&["queue=dynamic"])).await.unwrap(),
                InvocationOutcome::RaceLost {
                    name: "buildkite-agent-abc-123".to_string()
                }
            );
        }
    }

    mod failures {
        use super::*;

        #[tokio::test]
        async fn overlong_job_name_fails_before_any_call() {
            let mut event = event(&["queue=dynamic"]);
            event.job_id = "a".repeat(63);

            let core = core(
                MockControlPlane::new(),
                MockAuthenticator::new(),
                MockClusterConnector::new(),
            );
            let err = core.handle(&event).await.unwrap_err();
            assert!(matches!(
                err,
                DispatchError::Event(kite_common::EventError::JobNameTooLong { len: 79, .. })
            ));
            assert!(!err.is_retryable());
        }

        #[tokio::test]
        async fn lookup_failure_stops_before_authentication() {
            let mut control_plane = MockControlPlane::new();
            control_plane.expect_describe_cluster().returning(|name| {
                Err(EksError::lookup(name, LookupFailure::NotFound, "missing"))
            });

            let core = core(
                control_plane,
                MockAuthenticator::new(),
                MockClusterConnector::new(),
            );
            let err = core.handle(&event(&["queue=dynamic"])).await.unwrap_err();
            assert!(matches!(
                err,
                DispatchError::Eks(EksError::ClusterLookup { .. })
            ));
            assert!(err.is_retryable());
        }

        #[tokio::test]
        async fn auth_failure_stops_before_connecting() {
            let mut authenticator = MockAuthenticator::new();
            authenticator
                .expect_token()
                .returning(|c| Err(EksError::auth(&c.name, "no credentials")));

            let core = core(
                healthy_control_plane(),
                authenticator,
                MockClusterConnector::new(),
            );
            let err = core.handle(&event(&["queue=dynamic"])).await.unwrap_err();
            assert!(matches!(err, DispatchError::Eks(EksError::Auth { .. })));
        }

        #[tokio::test]
        async fn client_construction_failure_is_fatal() {
            let mut connector = MockClusterConnector::new();
            connector
                .expect_connect()
                .returning(|c, _, _| Err(EksError::client_construction(&c.name, "bad CA")));

            let core = core(healthy_control_plane(), healthy_authenticator(), connector);
            let err = core.handle(&event(&["queue=dynamic"])).await.unwrap_err();
            assert!(matches!(
                err,
                DispatchError::Eks(EksError::ClientConstruction { .. })
            ));
        }

        #[tokio::test]
        async fn list_failure_never_provisions() {
            let mut api = MockWorkloadApi::new();
            api.expect_list_jobs()
                .returning(|_, _| Err(api_error(503, "ServiceUnavailable")));
            api.expect_create_job().never();

            let core = core(
                healthy_control_plane(),
                healthy_authenticator(),
                connector_for(api),
            );
            let err = core.handle(&event(&["queue=dynamic"])).await.unwrap_err();
            assert!(matches!(
                err,
                DispatchError::Workload(WorkloadError::ExistenceCheck { .. })
            ));
        }

        #[tokio::test]
        async fn create_failure_is_a_provisioning_error() {
            let mut api = MockWorkloadApi::new();
            api.expect_list_jobs().returning(|_, _| Ok(vec![]));
            api.expect_create_job()
                .returning(|_, _| Err(api_error(403, "Forbidden")));

            let core = core(
                healthy_control_plane(),
                healthy_authenticator(),
                connector_for(api),
            );
            let err = core.handle(&event(&["queue=dynamic"])).await.unwrap_err();
            assert!(matches!(
                err,
                DispatchError::Workload(WorkloadError::Provisioning { .. })
            ));
        }
    }
}
