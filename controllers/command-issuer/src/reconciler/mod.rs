//! Reconciliation logic for issuers and certificate requests.
//!
//! - `issuer`: health-checks Issuer and ClusterIssuer configuration
//! - `certificate_request`: drives CertificateRequests through approval,
//!   issuer readiness, signing and terminal status
//!
//! Both reconcilers take a resource identity, re-read the resource, and
//! compute the next status and requeue decision from what they read.

pub mod certificate_request;
pub mod issuer;

pub use certificate_request::CertificateRequestReconciler;
pub use issuer::IssuerReconciler;

use kube_runtime::controller::Action;
use std::time::Duration;

use crate::config::ReconcilerSettings;
use crate::config_client::ConfigClient;
use crate::error::{ConfigError, ControllerError};
use crate::reconcile_helpers::resolve_secret_namespace;
use crate::signer::IssuerSecrets;
use crate::store::IssuerResource;

/// What the delivery layer should do after a reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing to do until the resource (or something it watches) changes
    AwaitChange,
    /// Reconcile again after the delay
    After(Duration),
}

impl Requeue {
    /// The equivalent controller action.
    pub fn into_action(self) -> Action {
        match self {
            Requeue::AwaitChange => Action::await_change(),
            Requeue::After(delay) => Action::requeue(delay),
        }
    }
}

/// Fetches the credential and CA secrets an issuer references.
///
/// The outer error is an API failure worth retrying; the inner one is a
/// configuration problem to report on the resource.
pub(crate) async fn load_issuer_secrets(
    config_client: &dyn ConfigClient,
    issuer: &IssuerResource,
    settings: &ReconcilerSettings,
) -> Result<Result<IssuerSecrets, ConfigError>, ControllerError> {
    let namespace = match resolve_secret_namespace(
        issuer.kind,
        issuer.namespace.as_deref(),
        issuer.spec.secret_namespace.as_deref(),
        &settings.cluster_resource_namespace,
        settings.secret_access_granted_at_cluster_level,
    ) {
        Ok(namespace) => namespace,
        Err(e) => return Ok(Err(e)),
    };

    let credentials_name = issuer.spec.command_secret_name.trim();
    if credentials_name.is_empty() {
        return Ok(Err(ConfigError::InvalidSpec("spec.commandSecretName is required".to_string())));
    }
    let Some(credentials) = config_client.get_secret(&namespace, credentials_name).await? else {
        return Ok(Err(ConfigError::SecretNotFound {
            namespace,
            name: credentials_name.to_string(),
        }));
    };

    let ca = match issuer.spec.ca_secret_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        None => None,
        Some(ca_name) => match config_client.get_secret(&namespace, ca_name).await? {
            Some(data) => Some(data),
            None => {
                return Ok(Err(ConfigError::SecretNotFound {
                    namespace,
                    name: ca_name.to_string(),
                }));
            }
        },
    };

    Ok(Ok(IssuerSecrets { credentials, ca }))
}
