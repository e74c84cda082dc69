//! Command Issuer Controller
//!
//! cert-manager external issuer backed by a Keyfactor Command CA:
//! - Issuer / ClusterIssuer: health-checked CA connection parameters
//! - CertificateRequest: approved requests referencing our issuers are
//!   signed by the CA and the certificate written back to status

mod backoff;
mod clock;
mod config;
mod config_client;
mod controller;
mod error;
mod leader;
mod metrics;
mod namespace;
mod reconcile_helpers;
#[cfg(test)]
mod reconcile_helpers_test;
mod reconciler;
mod server;
mod signer;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use clap::Parser;
use config::{Cli, ReconcilerSettings};
use controller::Controller;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Command Issuer Controller");

    let cluster_resource_namespace =
        match namespace::resolve_cluster_resource_namespace(Some(&cli.cluster_resource_namespace)) {
            Ok(ns) => ns,
            Err(e) => {
                error!(error = %e, "Failed to determine cluster resource namespace");
                return ExitCode::FAILURE;
            }
        };
    info!(namespace = %cluster_resource_namespace, "Cluster resource namespace resolved");

    if cli.secret_access_granted_at_cluster_level {
        info!("Secret access granted at cluster level, issuers may read secrets from any namespace");
    } else {
        info!(
            namespace = %cluster_resource_namespace,
            "Secret access scoped: Issuers read their own namespace, ClusterIssuers the cluster resource namespace"
        );
    }
    if cli.disable_approved_check {
        info!("Approval check disabled, CertificateRequests are signed without an Approved condition");
    }

    let settings = ReconcilerSettings::from_cli(&cli, cluster_resource_namespace);
    let result = match Controller::new(&cli, settings).await {
        Ok(controller) => controller.run().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            info!("Command Issuer Controller stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "Command Issuer Controller failed");
            ExitCode::FAILURE
        }
    }
}
