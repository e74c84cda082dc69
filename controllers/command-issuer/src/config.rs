//! Command line flags and the runtime settings derived from them.
//!
//! Flag names and defaults follow the usual controller-manager conventions,
//! including Go-style bind addresses (`:8080`) and `--flag=true` booleans.

use clap::{ArgAction, Parser};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::error::ControllerError;

/// Port reserved for admission and conversion webhooks.
pub const WEBHOOK_PORT: u16 = 9443;

/// Lease name used for leader election.
pub const LEADER_ELECTION_ID: &str = "b68cef20.keyfactor.com";

/// cert-manager external issuer backed by a Keyfactor Command CA.
#[derive(Debug, Clone, Parser)]
#[command(name = "command-issuer", version, about)]
pub struct Cli {
    /// The address the metric endpoint binds to ("0" disables it)
    #[arg(long, default_value = ":8080")]
    pub metrics_bind_address: String,

    /// The address the probe endpoint binds to ("0" disables it)
    #[arg(long, default_value = ":8081")]
    pub health_probe_bind_address: String,

    /// Enable leader election, ensuring only one active controller manager
    #[arg(long, num_args = 0..=1, default_missing_value = "true", default_value_t = false, action = ArgAction::Set)]
    pub leader_elect: bool,

    /// Namespace holding the leader election Lease (defaults to the cluster resource namespace)
    #[arg(long)]
    pub leader_election_namespace: Option<String>,

    /// The namespace for secrets in which cluster-scoped resources are found
    #[arg(long, default_value = "")]
    pub cluster_resource_namespace: String,

    /// Sign CertificateRequests without waiting for an Approved condition
    #[arg(long, num_args = 0..=1, default_missing_value = "true", default_value_t = false, action = ArgAction::Set)]
    pub disable_approved_check: bool,

    /// Secret access is granted at cluster level, allowing secrets in any namespace
    #[arg(long, num_args = 0..=1, default_missing_value = "true", default_value_t = false, action = ArgAction::Set)]
    pub secret_access_granted_at_cluster_level: bool,

    /// Deadline in seconds for each call to the CA
    #[arg(long, default_value_t = 30)]
    pub ca_request_timeout: u64,

    /// Ceiling in seconds on the requeue delay after transient failures
    #[arg(long, default_value_t = 300)]
    pub max_retry_interval: u64,

    /// Seconds a CertificateRequest may keep failing transiently before it is marked Failed
    #[arg(long, default_value_t = 3600)]
    pub max_retry_duration: u64,

    /// Seconds between health checks of a Ready issuer
    #[arg(long, default_value_t = 60)]
    pub health_check_interval: u64,
}

/// Settings shared by the reconcilers.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Namespace holding ClusterIssuer secrets
    pub cluster_resource_namespace: String,
    /// Secrets may live in any namespace
    pub secret_access_granted_at_cluster_level: bool,
    /// Wait for an Approved condition before signing
    pub check_approved_condition: bool,
    /// Deadline for each CA call
    pub ca_request_timeout: Duration,
    /// Requeue delay after a successful health check
    pub health_check_interval: Duration,
    /// Transient failure schedule
    pub retry: RetryPolicy,
}

impl ReconcilerSettings {
    /// Settings from flags, with the namespace already resolved.
    pub fn from_cli(cli: &Cli, cluster_resource_namespace: String) -> Self {
        let defaults = RetryPolicy::default();
        Self {
            cluster_resource_namespace,
            secret_access_granted_at_cluster_level: cli.secret_access_granted_at_cluster_level,
            check_approved_condition: !cli.disable_approved_check,
            ca_request_timeout: Duration::from_secs(cli.ca_request_timeout.max(1)),
            health_check_interval: Duration::from_secs(cli.health_check_interval.max(1)),
            retry: RetryPolicy {
                base: defaults.base,
                max_interval: Duration::from_secs(cli.max_retry_interval),
                max_duration: Duration::from_secs(cli.max_retry_duration),
            },
        }
    }

    /// Whether Secret events from `namespace` reach the issuer controllers.
    ///
    /// Without cluster-level access only the cluster resource namespace is watched.
    pub fn watches_secrets_in(&self, namespace: &str) -> bool {
        self.secret_access_granted_at_cluster_level || namespace == self.cluster_resource_namespace
    }
}

/// Parses a bind address. `"0"` (or empty) disables the listener.
///
/// Accepts `host:port`, `[v6]:port` and the Go shorthand `:port` for all interfaces.
pub fn parse_bind_address(value: &str) -> Result<Option<SocketAddr>, ControllerError> {
    let value = value.trim();
    if value.is_empty() || value == "0" {
        return Ok(None);
    }
    if let Some(port) = value.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("invalid bind address {value:?}")))?;
        return Ok(Some(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))));
    }
    value
        .parse()
        .map(Some)
        .map_err(|e| ControllerError::InvalidConfig(format!("invalid bind address {value:?}: {e}")))
}
