//! Reads and status writes for the resources the reconcilers drive.
//!
//! Reconcilers receive only an identity and always re-read the current
//! object through a [`ResourceStore`], so a stale cached copy never decides
//! what happens next.

use async_trait::async_trait;
use crds::{
    CertificateRequest, CertificateRequestStatus, ClusterIssuer, Issuer, IssuerKind, IssuerSpec,
    IssuerStatus,
};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;

use crate::error::ControllerError;

/// Kind-independent view of an Issuer or ClusterIssuer.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuerResource {
    /// Which kind this is
    pub kind: IssuerKind,
    /// Object name
    pub name: String,
    /// Namespace, `None` for a ClusterIssuer
    pub namespace: Option<String>,
    /// `metadata.generation`
    pub generation: Option<i64>,
    /// `metadata.resourceVersion`
    pub resource_version: Option<String>,
    /// Connection parameters
    pub spec: IssuerSpec,
    /// Current status, default when unset
    pub status: IssuerStatus,
}

impl IssuerResource {
    /// View of a namespaced Issuer.
    pub fn from_issuer(issuer: &Issuer) -> Self {
        Self {
            kind: IssuerKind::Issuer,
            name: issuer.name_any(),
            namespace: issuer.namespace(),
            generation: issuer.metadata.generation,
            resource_version: issuer.resource_version(),
            spec: issuer.spec.clone(),
            status: issuer.status.clone().unwrap_or_default(),
        }
    }

    /// View of a ClusterIssuer.
    pub fn from_cluster_issuer(issuer: &ClusterIssuer) -> Self {
        Self {
            kind: IssuerKind::ClusterIssuer,
            name: issuer.name_any(),
            namespace: None,
            generation: issuer.metadata.generation,
            resource_version: issuer.resource_version(),
            spec: issuer.spec.issuer.clone(),
            status: issuer.status.clone().unwrap_or_default(),
        }
    }

    /// `Kind namespace/name` for logs and messages.
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{} {}/{}", self.kind, ns, self.name),
            None => format!("{} {}", self.kind, self.name),
        }
    }
}

/// Whether a status write must match the resourceVersion that was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Fail with a conflict if the object changed since it was read
    ResourceVersion,
    /// Write regardless of intervening changes
    Unconditional,
}

/// Access to Issuers, ClusterIssuers and CertificateRequests.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Current state of an issuer, `None` if it does not exist.
    async fn get_issuer(
        &self,
        kind: IssuerKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<IssuerResource>, ControllerError>;

    /// Replaces the issuer's status, guarded by its resourceVersion.
    async fn update_issuer_status(&self, issuer: &IssuerResource, status: &IssuerStatus) -> Result<(), ControllerError>;

    /// Current state of a CertificateRequest, `None` if it does not exist.
    async fn get_certificate_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CertificateRequest>, ControllerError>;

    /// Replaces the request's status.
    async fn update_certificate_request_status(
        &self,
        request: &CertificateRequest,
        status: &CertificateRequestStatus,
        precondition: Precondition,
    ) -> Result<(), ControllerError>;
}

/// [`ResourceStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
}

impl std::fmt::Debug for KubeResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceStore").finish_non_exhaustive()
    }
}

impl KubeResourceStore {
    /// Store using the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Merge patch replacing `status`, optionally pinned to a resourceVersion.
///
/// The API server rejects the patch with 409 when the pinned version is stale.
pub(crate) fn status_patch<S: serde::Serialize>(
    status: &S,
    resource_version: Option<&str>,
) -> Result<serde_json::Value, ControllerError> {
    let mut patch = json!({ "status": serde_json::to_value(status)? });
    if let Some(rv) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    Ok(patch)
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get_issuer(
        &self,
        kind: IssuerKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<IssuerResource>, ControllerError> {
        match kind {
            IssuerKind::Issuer => {
                let Some(namespace) = namespace else {
                    return Err(ControllerError::InvalidConfig(format!(
                        "Issuer {name} looked up without a namespace"
                    )));
                };
                let api: Api<Issuer> = Api::namespaced(self.client.clone(), namespace);
                Ok(api.get_opt(name).await?.as_ref().map(IssuerResource::from_issuer))
            }
            IssuerKind::ClusterIssuer => {
                let api: Api<ClusterIssuer> = Api::all(self.client.clone());
                Ok(api.get_opt(name).await?.as_ref().map(IssuerResource::from_cluster_issuer))
            }
        }
    }

    async fn update_issuer_status(&self, issuer: &IssuerResource, status: &IssuerStatus) -> Result<(), ControllerError> {
        let patch = status_patch(status, issuer.resource_version.as_deref())?;
        let params = PatchParams::default();
        let result = match (&issuer.kind, &issuer.namespace) {
            (IssuerKind::Issuer, Some(namespace)) => {
                let api: Api<Issuer> = Api::namespaced(self.client.clone(), namespace);
                api.patch_status(&issuer.name, &params, &Patch::Merge(&patch)).await.map(|_| ())
            }
            (IssuerKind::Issuer, None) => {
                return Err(ControllerError::InvalidConfig(format!(
                    "Issuer {} has no namespace",
                    issuer.name
                )));
            }
            (IssuerKind::ClusterIssuer, _) => {
                let api: Api<ClusterIssuer> = Api::all(self.client.clone());
                api.patch_status(&issuer.name, &params, &Patch::Merge(&patch)).await.map(|_| ())
            }
        };
        result.map_err(|e| ControllerError::from_write(e, issuer.display_name()))
    }

    async fn get_certificate_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CertificateRequest>, ControllerError> {
        let api: Api<CertificateRequest> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_certificate_request_status(
        &self,
        request: &CertificateRequest,
        status: &CertificateRequestStatus,
        precondition: Precondition,
    ) -> Result<(), ControllerError> {
        let namespace = request.namespace().unwrap_or_default();
        let name = request.name_any();
        let resource_version = match precondition {
            Precondition::ResourceVersion => request.resource_version(),
            Precondition::Unconditional => None,
        };
        let patch = status_patch(status, resource_version.as_deref())?;
        let api: Api<CertificateRequest> = Api::namespaced(self.client.clone(), &namespace);
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| ControllerError::from_write(e, format!("CertificateRequest {namespace}/{name}")))
    }
}
