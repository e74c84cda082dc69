//! Helper functions for common reconciliation patterns
//!
//! Pure functions shared by the issuer and certificate request reconcilers:
//! secret namespace scoping, timestamp arithmetic, annotation metadata and
//! status comparison.

use chrono::{DateTime, Utc};
use crds::IssuerKind;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigError;

/// Annotations with this prefix are forwarded to the CA as enrollment metadata.
pub const METADATA_ANNOTATION_PREFIX: &str = "command-issuer.keyfactor.com/";

/// Namespace an issuer's secrets are read from.
///
/// The base namespace is the Issuer's own namespace, or the cluster resource
/// namespace for a ClusterIssuer. A different `secretNamespace` is only
/// honored when secret access is granted at cluster level; otherwise it is
/// rejected before any lookup happens.
pub fn resolve_secret_namespace(
    kind: IssuerKind,
    issuer_namespace: Option<&str>,
    requested: Option<&str>,
    cluster_resource_namespace: &str,
    access_granted_at_cluster_level: bool,
) -> Result<String, ConfigError> {
    let base = match kind {
        IssuerKind::Issuer => issuer_namespace.ok_or_else(|| {
            ConfigError::InvalidSpec("namespaced Issuer without a namespace".to_string())
        })?,
        IssuerKind::ClusterIssuer => cluster_resource_namespace,
    };

    match requested.map(str::trim).filter(|ns| !ns.is_empty()) {
        None => Ok(base.to_string()),
        Some(requested) if requested == base => Ok(base.to_string()),
        Some(requested) if access_granted_at_cluster_level => Ok(requested.to_string()),
        Some(requested) => Err(ConfigError::NamespaceNotAllowed {
            requested: requested.to_string(),
            allowed: base.to_string(),
        }),
    }
}

/// `metadata.creationTimestamp` as a chrono time.
///
/// Goes through the serialized RFC 3339 form so it does not depend on the
/// time library behind `k8s-openapi`'s `Time`.
pub fn creation_time(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(meta.creation_timestamp.as_ref()?).ok()?;
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Time from `since` to `now`, zero when unknown or in the future.
pub fn elapsed_since(now: DateTime<Utc>, since: Option<DateTime<Utc>>) -> Duration {
    since
        .and_then(|since| (now - since).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

/// Enrollment metadata from annotations carrying [`METADATA_ANNOTATION_PREFIX`].
pub fn enrollment_metadata(annotations: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    annotations
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(METADATA_ANNOTATION_PREFIX)
                .filter(|field| !field.is_empty())
                .map(|field| (field.to_string(), value.clone()))
        })
        .collect()
}

/// Human readable duration for condition messages, e.g. `1h0m0s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
