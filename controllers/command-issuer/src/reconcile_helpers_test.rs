//! Unit tests for reconcile_helpers module

#[cfg(test)]
mod tests {
    use crate::error::ConfigError;
    use crate::reconcile_helpers::*;
    use chrono::{TimeZone, Utc};
    use crds::IssuerKind;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn test_issuer_secrets_default_to_own_namespace() {
        let ns = resolve_secret_namespace(IssuerKind::Issuer, Some("team-a"), None, "cert-manager", false).unwrap();
        assert_eq!(ns, "team-a");
    }

    #[test]
    fn test_cluster_issuer_secrets_default_to_cluster_resource_namespace() {
        let ns = resolve_secret_namespace(IssuerKind::ClusterIssuer, None, None, "cert-manager", false).unwrap();
        assert_eq!(ns, "cert-manager");
    }

    #[test]
    fn test_foreign_namespace_rejected_without_cluster_access() {
        let err = resolve_secret_namespace(IssuerKind::Issuer, Some("team-a"), Some("team-b"), "cert-manager", false)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::NamespaceNotAllowed {
                requested: "team-b".to_string(),
                allowed: "team-a".to_string(),
            }
        );

        let err = resolve_secret_namespace(IssuerKind::ClusterIssuer, None, Some("pki"), "cert-manager", false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NamespaceNotAllowed { .. }));
    }

    #[test]
    fn test_same_namespace_allowed_without_cluster_access() {
        let ns = resolve_secret_namespace(IssuerKind::Issuer, Some("team-a"), Some("team-a"), "cert-manager", false)
            .unwrap();
        assert_eq!(ns, "team-a");
    }

    #[test]
    fn test_foreign_namespace_honored_with_cluster_access() {
        let ns = resolve_secret_namespace(IssuerKind::Issuer, Some("team-a"), Some("pki"), "cert-manager", true).unwrap();
        assert_eq!(ns, "pki");
        let ns = resolve_secret_namespace(IssuerKind::ClusterIssuer, None, Some(" "), "cert-manager", true).unwrap();
        assert_eq!(ns, "cert-manager");
    }

    #[test]
    fn test_creation_time_round_trips() {
        let meta: ObjectMeta = serde_json::from_value(serde_json::json!({
            "name": "req",
            "creationTimestamp": "2024-05-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(
            creation_time(&meta),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(creation_time(&ObjectMeta::default()), None);
    }

    #[test]
    fn test_elapsed_since() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let now = start + chrono::Duration::seconds(90);
        assert_eq!(elapsed_since(now, Some(start)), Duration::from_secs(90));
        assert_eq!(elapsed_since(start, Some(now)), Duration::ZERO);
        assert_eq!(elapsed_since(now, None), Duration::ZERO);
    }

    #[test]
    fn test_enrollment_metadata_strips_prefix() {
        let annotations = BTreeMap::from([
            ("command-issuer.keyfactor.com/Team".to_string(), "platform".to_string()),
            ("command-issuer.keyfactor.com/".to_string(), "ignored".to_string()),
            ("cert-manager.io/certificate-name".to_string(), "web".to_string()),
        ]);
        let metadata = enrollment_metadata(&annotations);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata["Team"], "platform");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h2m5s");
    }
}
