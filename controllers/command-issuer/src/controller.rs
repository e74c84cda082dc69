//! Process wiring.
//!
//! Starts the probe and metrics endpoints, optionally waits for the leader
//! Lease, then runs the Issuer, ClusterIssuer and CertificateRequest
//! controllers until one of them stops, leadership is lost, or the process
//! is asked to shut down.

use anyhow::{Context, Result};
use crds::{IssuerKind, Scheme};
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{parse_bind_address, Cli, ReconcilerSettings, LEADER_ELECTION_ID, WEBHOOK_PORT};
use crate::config_client::KubeConfigClient;
use crate::error::ControllerError;
use crate::leader::{leadership_lost, LeaderElector};
use crate::metrics::Metrics;
use crate::reconciler::{CertificateRequestReconciler, IssuerReconciler};
use crate::server::{metrics_router, probe_router, serve, ProbeState};
use crate::signer::command::{command_health_checker_builder, command_signer_builder};
use crate::store::KubeResourceStore;
use crate::watcher::Watcher;

type WatchHandle = JoinHandle<Result<(), ControllerError>>;

/// Main controller for issuer and certificate request management.
pub struct Controller {
    client: Client,
    settings: ReconcilerSettings,
    leader_election_namespace: Option<String>,
    metrics: Arc<Metrics>,
    probes: ProbeState,
    servers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("settings", &self.settings)
            .field("leader_election_namespace", &self.leader_election_namespace)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Starts the HTTP endpoints and connects to the API server.
    pub async fn new(cli: &Cli, settings: ReconcilerSettings) -> Result<Self> {
        let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
        let probes = ProbeState::default();
        let mut servers = Vec::new();

        if let Some(addr) = parse_bind_address(&cli.health_probe_bind_address)? {
            servers.push(serve(addr, probe_router(probes.clone()), "health probe").await?);
        }
        if let Some(addr) = parse_bind_address(&cli.metrics_bind_address)? {
            servers.push(serve(addr, metrics_router(Arc::clone(&metrics)), "metrics").await?);
        } else {
            info!("Metrics endpoint disabled");
        }
        info!(port = WEBHOOK_PORT, "Webhook port reserved, no webhooks are registered");

        let client = Client::try_default()
            .await
            .context("failed to create Kubernetes client")?;

        let leader_election_namespace = cli.leader_elect.then(|| {
            cli.leader_election_namespace
                .clone()
                .filter(|ns| !ns.trim().is_empty())
                .unwrap_or_else(|| settings.cluster_resource_namespace.clone())
        });

        Ok(Self {
            client,
            settings,
            leader_election_namespace,
            metrics,
            probes,
            servers,
        })
    }

    fn watcher(&self, clock: &Arc<dyn Clock>) -> Result<Watcher> {
        let store = Arc::new(KubeResourceStore::new(self.client.clone()));
        let config_client = Arc::new(KubeConfigClient::new(self.client.clone()));
        let scheme = Arc::new(Scheme::with_defaults().context("failed to build resource scheme")?);
        let timeout = self.settings.ca_request_timeout;

        let issuer = |kind| {
            Arc::new(IssuerReconciler::new(
                kind,
                Arc::clone(&store) as _,
                Arc::clone(&config_client) as _,
                command_health_checker_builder(timeout),
                Arc::clone(clock),
                self.settings.clone(),
            ))
        };
        let requests = Arc::new(CertificateRequestReconciler::new(
            Arc::clone(&store) as _,
            Arc::clone(&config_client) as _,
            command_signer_builder(timeout),
            Arc::clone(clock),
            Arc::clone(&scheme),
            Arc::clone(&self.metrics),
            self.settings.clone(),
        ));

        Ok(Watcher::new(
            self.client.clone(),
            issuer(IssuerKind::Issuer),
            issuer(IssuerKind::ClusterIssuer),
            requests,
            scheme,
            Arc::clone(&self.metrics),
            self.settings.clone(),
        ))
    }

    /// Runs until a controller stops, leadership is lost, or a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let leadership = match &self.leader_election_namespace {
            Some(namespace) => {
                let elector = LeaderElector::new(self.client.clone(), namespace, LEADER_ELECTION_ID, Arc::clone(&clock));
                elector.acquire().await;
                info!(identity = %elector.identity(), "Became leader");
                Some(elector.spawn_renewal())
            }
            None => {
                warn!("Leader election disabled, running as the only active replica");
                None
            }
        };

        let watcher = Arc::new(self.watcher(&clock)?);
        let issuers: WatchHandle = tokio::spawn({
            let watcher = Arc::clone(&watcher);
            async move { watcher.watch_issuers().await }
        });
        let cluster_issuers: WatchHandle = tokio::spawn({
            let watcher = Arc::clone(&watcher);
            async move { watcher.watch_cluster_issuers().await }
        });
        let requests: WatchHandle = tokio::spawn({
            let watcher = Arc::clone(&watcher);
            async move { watcher.watch_certificate_requests().await }
        });
        let handles = [issuers, cluster_issuers, requests];
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        self.probes.set_ready(true);
        info!("Controllers started");

        let outcome = tokio::select! {
            (result, index, _) = futures::future::select_all(handles) => {
                let which = ["Issuer", "ClusterIssuer", "CertificateRequest"][index];
                error!(controller = which, result = ?result, "Controller exited unexpectedly");
                Err(anyhow::anyhow!("{which} controller exited unexpectedly"))
            }
            lost = async {
                match leadership {
                    Some(leader) => leadership_lost(leader).await,
                    None => std::future::pending().await,
                }
            } => {
                Err(lost.into())
            }
            result = shutdown_signal() => {
                info!("Shutdown signal received, stopping controllers");
                result
            }
        };

        self.probes.set_ready(false);
        for abort in aborts {
            abort.abort();
        }
        for server in &self.servers {
            server.abort();
        }
        outcome
    }
}

/// Waits for SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT"),
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("failed to listen for SIGINT")
    }
}
