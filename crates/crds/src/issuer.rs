//! Issuer and ClusterIssuer CRDs
//!
//! Both kinds share one schema. An `Issuer` is namespaced and resolves its
//! secrets in its own namespace; a `ClusterIssuer` is cluster-scoped and
//! resolves them in the controller's cluster resource namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::{find_condition, is_condition_true, Condition, CONDITION_READY};

/// API group served by this controller.
pub const ISSUER_GROUP: &str = "command-issuer.keyfactor.com";

/// API version of the Issuer kinds.
pub const ISSUER_VERSION: &str = "v1alpha1";

/// Default REST path prefix of the CA API.
pub const DEFAULT_API_PATH: &str = "KeyfactorAPI";

fn default_api_path() -> String {
    DEFAULT_API_PATH.to_string()
}

/// CA connection parameters shared by Issuer and ClusterIssuer.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "command-issuer.keyfactor.com",
    version = "v1alpha1",
    kind = "Issuer",
    namespaced,
    status = "IssuerStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    /// Hostname of the CA API, with or without scheme
    pub hostname: String,

    /// Path prefix of the CA REST API
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Secret holding the API credentials (basic-auth or OAuth client credentials)
    pub command_secret_name: String,

    /// Optional secret holding `ca.crt`, trusted when connecting to the CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_secret_name: Option<String>,

    /// Namespace of the referenced secrets. Only honored when the controller
    /// has cluster-wide secret access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_namespace: Option<String>,

    /// Certificate template used for enrollment
    pub certificate_template: String,

    /// Logical name of the issuing CA
    pub certificate_authority_logical_name: String,

    /// Hostname of the issuing CA, if it differs from the API host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_hostname: Option<String>,

    /// Space separated OAuth scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<String>,

    /// OAuth audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

/// Cluster-scoped issuer; same schema as [`IssuerSpec`].
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "command-issuer.keyfactor.com",
    version = "v1alpha1",
    kind = "ClusterIssuer",
    status = "IssuerStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
pub struct ClusterIssuerSpec {
    /// Connection parameters
    #[serde(flatten)]
    pub issuer: IssuerSpec,
}

/// Observed state of an Issuer or ClusterIssuer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerStatus {
    /// Conditions, at most one per type. Only `Ready` is written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl IssuerStatus {
    /// The `Ready` condition, if any.
    pub fn ready_condition(&self) -> Option<&Condition> {
        find_condition(&self.conditions, CONDITION_READY)
    }

    /// True when `Ready` is `True`.
    pub fn is_ready(&self) -> bool {
        is_condition_true(&self.conditions, CONDITION_READY)
    }
}

/// Which of the two issuer kinds a resource or reference denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IssuerKind {
    /// Namespaced `Issuer`
    Issuer,
    /// Cluster-scoped `ClusterIssuer`
    ClusterIssuer,
}

impl IssuerKind {
    /// Kind name as it appears in `issuerRef.kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            IssuerKind::Issuer => "Issuer",
            IssuerKind::ClusterIssuer => "ClusterIssuer",
        }
    }

    /// Parses a kind name; an empty name defaults to `Issuer` as cert-manager does.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "" | "Issuer" => Some(IssuerKind::Issuer),
            "ClusterIssuer" => Some(IssuerKind::ClusterIssuer),
            _ => None,
        }
    }
}

impl fmt::Display for IssuerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{set_condition, ConditionStatus, reasons};

    #[test]
    fn test_issuer_spec_defaults_api_path() {
        let spec: IssuerSpec = serde_json::from_value(serde_json::json!({
            "hostname": "ca.example.com",
            "commandSecretName": "command-credentials",
            "certificateTemplate": "WebServer",
            "certificateAuthorityLogicalName": "Issuing-CA"
        }))
        .unwrap();
        assert_eq!(spec.api_path, DEFAULT_API_PATH);
        assert!(spec.secret_namespace.is_none());
    }

    #[test]
    fn test_cluster_issuer_spec_is_flat() {
        let spec: ClusterIssuerSpec = serde_json::from_value(serde_json::json!({
            "hostname": "ca.example.com",
            "apiPath": "CustomAPI",
            "commandSecretName": "command-credentials",
            "secretNamespace": "pki",
            "certificateTemplate": "WebServer",
            "certificateAuthorityLogicalName": "Issuing-CA"
        }))
        .unwrap();
        assert_eq!(spec.issuer.api_path, "CustomAPI");
        assert_eq!(spec.issuer.secret_namespace.as_deref(), Some("pki"));

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["hostname"], "ca.example.com");
    }

    #[test]
    fn test_issuer_status_readiness() {
        let mut status = IssuerStatus::default();
        assert!(!status.is_ready());
        set_condition(
            &mut status.conditions,
            CONDITION_READY,
            ConditionStatus::True,
            reasons::VERIFIED,
            "verified",
            None,
            chrono::Utc::now(),
        );
        assert!(status.is_ready());
    }

    #[test]
    fn test_issuer_kind_from_kind() {
        assert_eq!(IssuerKind::from_kind(""), Some(IssuerKind::Issuer));
        assert_eq!(IssuerKind::from_kind("ClusterIssuer"), Some(IssuerKind::ClusterIssuer));
        assert_eq!(IssuerKind::from_kind("CAIssuer"), None);
    }
}
