//! Kube client construction from a resolved cluster and a bearer token
//!
//! Pure composition: nothing here talks to the network.

use kube::{Client, Config};
use secrecy::SecretString;
use x509_parser::pem::Pem;

use crate::descriptor::ClusterDescriptor;
use crate::error::EksError;
use crate::token::AuthToken;

/// Build the kube configuration for a cluster
///
/// The CA bundle must contain at least one well-formed X.509 certificate.
pub fn client_config(
    cluster: &ClusterDescriptor,
    token: &AuthToken,
    namespace: &str,
) -> Result<Config, EksError> {
    let cluster_url = cluster.endpoint.parse::<http::Uri>().map_err(|e| {
        EksError::client_construction(
            &cluster.name,
            format!("invalid endpoint '{}': {e}", cluster.endpoint),
        )
    })?;
    let root_cert = trust_root_der(&cluster.name, &cluster.trust_root)?;

    let mut config = Config::new(cluster_url);
    config.default_namespace = namespace.to_string();
    config.root_cert = Some(root_cert);
    config.auth_info.token = Some(SecretString::from(token.expose().to_string()));
    Ok(config)
}

/// Build a kube client bound to one cluster and namespace
pub fn build_client(
    cluster: &ClusterDescriptor,
    token: &AuthToken,
    namespace: &str,
) -> Result<Client, EksError> {
    let config = client_config(cluster, token, namespace)?;
    Client::try_from(config)
        .map_err(|e| EksError::client_construction(&cluster.name, e.to_string()))
}

/// Convert a PEM bundle into DER certificates
fn trust_root_der(cluster: &str, pem: &[u8]) -> Result<Vec<Vec<u8>>, EksError> {
    let invalid = |msg: String| EksError::client_construction(cluster, msg);

    let mut certs = Vec::new();
    for block in Pem::iter_from_buffer(pem) {
        let block = block.map_err(|e| invalid(format!("malformed CA bundle: {e}")))?;
        if block.label != "CERTIFICATE" {
            continue;
        }
        block
            .parse_x509()
            .map_err(|e| invalid(format!("malformed CA certificate: {e}")))?;
        certs.push(block.contents);
    }

    if certs.is_empty() {
        return Err(invalid("CA bundle contains no certificates".to_string()));
    }
    Ok(certs)
}
