//! IAM-federated bearer tokens for EKS
//!
//! A token is a presigned STS `GetCallerIdentity` URL, base64url-encoded and
//! prefixed with `k8s-aws-v1.`. The API server replays the URL against STS to
//! learn the caller's identity. The `x-k8s-aws-id` header is part of the
//! signature, which binds the token to a single cluster. Minting a token never
//! talks to the cluster itself.

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::SdkConfig;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SignatureLocation, SigningParams, SigningSettings,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::descriptor::ClusterDescriptor;
use crate::error::EksError;

/// Prefix every EKS token carries
pub const TOKEN_PREFIX: &str = "k8s-aws-v1.";

/// Header binding the presigned request to a cluster
pub const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";

/// Session name used when assuming the configured role
pub const SESSION_NAME: &str = "kite-dispatch";

/// Validity of the presigned URL. EKS accepts the token for 15 minutes
/// regardless of this value.
const PRESIGN_EXPIRY: Duration = Duration::from_secs(60);

/// A short-lived bearer token for one cluster
pub struct AuthToken(SecretString);

impl AuthToken {
    /// Wrap an already minted token
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Reveal the token for use in an Authorization header
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

/// Trait abstracting token minting
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Mint a bearer token for the cluster using its configured role
    async fn token(&self, cluster: &ClusterDescriptor) -> Result<AuthToken, EksError>;
}

/// Real authenticator: assumes the cluster role from ambient credentials and
/// presigns locally
pub struct IamAuthenticator {
    sdk_config: SdkConfig,
}

impl IamAuthenticator {
    /// Create an authenticator from shared SDK configuration
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }
}

#[async_trait]
impl Authenticator for IamAuthenticator {
    async fn token(&self, cluster: &ClusterDescriptor) -> Result<AuthToken, EksError> {
        let region = self
            .sdk_config
            .region()
            .ok_or_else(|| EksError::auth(&cluster.name, "no AWS region configured"))?
            .to_string();

        let provider = AssumeRoleProvider::builder(cluster.role_arn.clone())
            .session_name(SESSION_NAME)
            .configure(&self.sdk_config)
            .build()
            .await;

        let credentials = provider.provide_credentials().await.map_err(|e| {
            EksError::auth(
                &cluster.name,
                format!("failed to assume role {}: {e}", cluster.role_arn),
            )
        })?;

        debug!(cluster = %cluster.name, role = %cluster.role_arn, "assumed cluster role");

        presign_token(&credentials, &region, &cluster.name, SystemTime::now())
    }
}

/// STS endpoint for a region
fn sts_url(region: &str) -> String {
    format!("https://sts.{region}.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15")
}

/// Presign a `GetCallerIdentity` request for a cluster and encode it as a token
pub fn presign_token(
    credentials: &Credentials,
    region: &str,
    cluster: &str,
    now: SystemTime,
) -> Result<AuthToken, EksError> {
    let sign_err = |e: &dyn fmt::Display| EksError::auth(cluster, format!("signing failed: {e}"));

    let identity: Identity = credentials.clone().into();

    let mut settings = SigningSettings::default();
    settings.signature_location = SignatureLocation::QueryParams;
    settings.expires_in = Some(PRESIGN_EXPIRY);

    let params: SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name("sts")
        .time(now)
        .settings(settings)
        .build()
        .map_err(|e| sign_err(&e))?
        .into();

    let url = sts_url(region);
    let signable = SignableRequest::new(
        "GET",
        url.as_str(),
        std::iter::once((CLUSTER_ID_HEADER, cluster)),
        SignableBody::Bytes(&[]),
    )
    .map_err(|e| sign_err(&e))?;

    let (instructions, _signature) = sign(signable, &params)
        .map_err(|e| sign_err(&e))?
        .into_parts();

    let mut request = http::Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header(CLUSTER_ID_HEADER, cluster)
        .body(())
        .map_err(|e| sign_err(&e))?;
    instructions.apply_to_request_http1x(&mut request);

    let presigned = request.uri().to_string();
    Ok(AuthToken::new(format!(
        "{TOKEN_PREFIX}{}",
        URL_SAFE_NO_PAD.encode(presigned)
    )))
}
