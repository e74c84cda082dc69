//! Registry of resource kinds known to the controller
//!
//! Built once at startup and passed by reference to whoever needs to map an
//! `issuerRef` to a kind or render the CRD manifests.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::ApiResource;
use kube::CustomResourceExt;

use crate::certificate_request::CertificateRequest;
use crate::error::CrdError;
use crate::issuer::{ClusterIssuer, Issuer, IssuerKind, ISSUER_GROUP};

#[derive(Debug, Clone)]
struct Entry {
    resource: ApiResource,
    crd: CustomResourceDefinition,
    owned: bool,
}

/// Known resource kinds, keyed by group and kind.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    entries: Vec<Entry>,
}

impl Scheme {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the issuer kinds (owned) and cert-manager's CertificateRequest.
    pub fn with_defaults() -> Result<Self, CrdError> {
        let mut scheme = Self::new();
        scheme.register::<Issuer>(true)?;
        scheme.register::<ClusterIssuer>(true)?;
        scheme.register::<CertificateRequest>(false)?;
        Ok(scheme)
    }

    /// Adds a kind. `owned` kinds have their CRD rendered by [`Scheme::crds`].
    pub fn register<K: CustomResourceExt>(&mut self, owned: bool) -> Result<(), CrdError> {
        let resource = K::api_resource();
        if self.lookup(&resource.group, &resource.kind).is_some() {
            return Err(CrdError::DuplicateKind(format!("{}/{}", resource.group, resource.kind)));
        }
        self.entries.push(Entry {
            resource,
            crd: K::crd(),
            owned,
        });
        Ok(())
    }

    fn lookup(&self, group: &str, kind: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.resource.group == group && e.resource.kind == kind)
    }

    /// True when the group/kind pair is registered.
    pub fn recognizes(&self, group: &str, kind: &str) -> bool {
        self.lookup(group, kind).is_some()
    }

    /// Maps an `issuerRef` to one of our issuer kinds.
    ///
    /// Returns `None` for other groups (another issuer implementation is
    /// responsible) and for kinds that are not registered. An empty kind
    /// means `Issuer`.
    pub fn issuer_kind(&self, group: Option<&str>, kind: Option<&str>) -> Option<IssuerKind> {
        let group = group.unwrap_or_default();
        if group != ISSUER_GROUP {
            return None;
        }
        let kind = IssuerKind::from_kind(kind.unwrap_or_default())?;
        self.recognizes(group, kind.as_str()).then_some(kind)
    }

    /// CRD manifests of the owned kinds, in registration order.
    pub fn crds(&self) -> Vec<CustomResourceDefinition> {
        self.entries
            .iter()
            .filter(|e| e.owned)
            .map(|e| e.crd.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issuer_kind_resolution() {
        let scheme = Scheme::with_defaults().unwrap();
        assert_eq!(
            scheme.issuer_kind(Some(ISSUER_GROUP), Some("Issuer")),
            Some(IssuerKind::Issuer)
        );
        assert_eq!(
            scheme.issuer_kind(Some(ISSUER_GROUP), None),
            Some(IssuerKind::Issuer)
        );
        assert_eq!(
            scheme.issuer_kind(Some(ISSUER_GROUP), Some("ClusterIssuer")),
            Some(IssuerKind::ClusterIssuer)
        );
        assert_eq!(scheme.issuer_kind(Some("cert-manager.io"), Some("Issuer")), None);
        assert_eq!(scheme.issuer_kind(None, Some("ClusterIssuer")), None);
        assert_eq!(scheme.issuer_kind(Some(ISSUER_GROUP), Some("VaultIssuer")), None);
    }

    #[test]
    fn test_unregistered_kind_is_not_resolved() {
        let mut scheme = Scheme::new();
        scheme.register::<Issuer>(true).unwrap();
        assert_eq!(scheme.issuer_kind(Some(ISSUER_GROUP), Some("ClusterIssuer")), None);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut scheme = Scheme::with_defaults().unwrap();
        let err = scheme.register::<Issuer>(true).unwrap_err();
        assert!(matches!(err, CrdError::DuplicateKind(_)));
    }

    #[test]
    fn test_crds_only_owned_kinds() {
        let scheme = Scheme::with_defaults().unwrap();
        let names: Vec<String> = scheme
            .crds()
            .into_iter()
            .filter_map(|crd| crd.metadata.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "issuers.command-issuer.keyfactor.com".to_string(),
                "clusterissuers.command-issuer.keyfactor.com".to_string()
            ]
        );
        assert!(scheme.recognizes("cert-manager.io", "CertificateRequest"));
    }
}
