//! Kubernetes resource watchers.
//!
//! Each resource kind runs in its own `kube_runtime::Controller`. The
//! controllers only deliver identities: every reconcile re-reads the object
//! through the reconcilers' store, so the cached copy here is used for
//! routing dependent events and nothing else.
//!
//! Routing:
//! - Secret changes wake the issuers that reference the secret
//! - Issuer and ClusterIssuer changes wake the unfinished requests that reference them

use crds::{CertificateRequest, ClusterIssuer, Issuer, IssuerKind, IssuerSpec, Scheme};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{watcher, Controller};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ReconcilerSettings;
use crate::error::ControllerError;
use crate::metrics::{results, Metrics};
use crate::reconcile_helpers::resolve_secret_namespace;
use crate::reconciler::{CertificateRequestReconciler, IssuerReconciler, Requeue};

/// Concurrent reconciles per controller.
const CONCURRENCY: u16 = 4;

/// Shared state handed to every reconcile of one controller.
struct Context<R> {
    reconciler: Arc<R>,
    metrics: Arc<Metrics>,
    retry_base: Duration,
    controller: &'static str,
}

/// True when a change to `secret_namespace/secret_name` affects this issuer.
pub fn issuer_uses_secret(
    kind: IssuerKind,
    issuer_namespace: Option<&str>,
    spec: &IssuerSpec,
    secret_namespace: &str,
    secret_name: &str,
    settings: &ReconcilerSettings,
) -> bool {
    let Ok(namespace) = resolve_secret_namespace(
        kind,
        issuer_namespace,
        spec.secret_namespace.as_deref(),
        &settings.cluster_resource_namespace,
        settings.secret_access_granted_at_cluster_level,
    ) else {
        return false;
    };
    if namespace != secret_namespace {
        return false;
    }
    spec.command_secret_name.trim() == secret_name
        || spec.ca_secret_name.as_deref().map(str::trim) == Some(secret_name)
}

/// True when `request` is unfinished and references the given issuer.
pub fn request_references_issuer(
    request: &CertificateRequest,
    scheme: &Scheme,
    kind: IssuerKind,
    issuer_namespace: Option<&str>,
    issuer_name: &str,
) -> bool {
    let issuer_ref = &request.spec.issuer_ref;
    if issuer_ref.name != issuer_name {
        return false;
    }
    if scheme.issuer_kind(issuer_ref.group.as_deref(), issuer_ref.kind.as_deref()) != Some(kind) {
        return false;
    }
    if request.status.as_ref().is_some_and(|status| status.is_terminal()) {
        return false;
    }
    match kind {
        IssuerKind::Issuer => request.namespace().as_deref() == issuer_namespace,
        IssuerKind::ClusterIssuer => true,
    }
}

fn requests_for_issuer(
    requests: &Store<CertificateRequest>,
    scheme: &Scheme,
    kind: IssuerKind,
    issuer_namespace: Option<&str>,
    issuer_name: &str,
) -> Vec<ObjectRef<CertificateRequest>> {
    requests
        .state()
        .into_iter()
        .filter(|request| request_references_issuer(request, scheme, kind, issuer_namespace, issuer_name))
        .map(|request| ObjectRef::from_obj(&*request))
        .collect()
}

/// Records metrics for one reconcile and maps its outcome to an action.
async fn timed<R>(
    ctx: &Context<R>,
    reconcile: impl Future<Output = Result<Requeue, ControllerError>>,
) -> Result<Action, ControllerError> {
    let started = Instant::now();
    let result = reconcile.await;
    let label = match &result {
        Ok(_) => results::SUCCESS,
        Err(ControllerError::Conflict(_)) => results::CONFLICT,
        Err(_) => results::ERROR,
    };
    ctx.metrics.record_reconcile(ctx.controller, label, started.elapsed());
    result.map(Requeue::into_action)
}

/// Conflicts are retried at once against fresh state; other errors back off.
fn error_policy<K, R>(object: Arc<K>, error: &ControllerError, ctx: Arc<Context<R>>) -> Action
where
    K: Resource,
{
    match error {
        ControllerError::Conflict(what) => {
            debug!(controller = ctx.controller, object = %what, "Status write conflicted, requeueing");
            Action::requeue(Duration::ZERO)
        }
        other => {
            warn!(
                controller = ctx.controller,
                namespace = ?object.namespace(),
                name = %object.name_any(),
                error = %other,
                "Reconciliation failed"
            );
            Action::requeue(ctx.retry_base)
        }
    }
}

/// Drives a configured controller until its watch streams end.
async fn run_controller<K, R, F, Fut>(controller: Controller<K>, ctx: Arc<Context<R>>, reconcile: F)
where
    K: Resource + Clone + serde::de::DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    R: Send + Sync + 'static,
    F: FnMut(Arc<K>, Arc<Context<R>>) -> Fut,
    Fut: Future<Output = Result<Action, ControllerError>> + Send + 'static,
{
    let name = ctx.controller;
    info!(controller = name, "Starting controller");
    controller
        .with_config(ControllerConfig::default().concurrency(CONCURRENCY))
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(controller = name, object = %object, action = ?action, "Reconciled"),
                Err(e) => debug!(controller = name, error = %e, "Controller event failed"),
            }
        })
        .await;
    info!(controller = name, "Controller stopped");
}

/// Starts and owns the three controllers.
pub struct Watcher {
    client: Client,
    issuers: Arc<IssuerReconciler>,
    cluster_issuers: Arc<IssuerReconciler>,
    requests: Arc<CertificateRequestReconciler>,
    scheme: Arc<Scheme>,
    metrics: Arc<Metrics>,
    settings: ReconcilerSettings,
}

impl Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        client: Client,
        issuers: Arc<IssuerReconciler>,
        cluster_issuers: Arc<IssuerReconciler>,
        requests: Arc<CertificateRequestReconciler>,
        scheme: Arc<Scheme>,
        metrics: Arc<Metrics>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            client,
            issuers,
            cluster_issuers,
            requests,
            scheme,
            metrics,
            settings,
        }
    }

    fn context<R>(&self, reconciler: &Arc<R>, controller: &'static str) -> Arc<Context<R>> {
        Arc::new(Context {
            reconciler: Arc::clone(reconciler),
            metrics: Arc::clone(&self.metrics),
            retry_base: self.settings.retry.base,
            controller,
        })
    }

    /// Secrets are only watched outside the cluster resource namespace when
    /// access was granted at cluster level.
    /// Secrets visible to the issuer controllers, matching [`ReconcilerSettings::watches_secrets_in`].
    fn secrets_api(&self) -> Api<Secret> {
        if self.settings.secret_access_granted_at_cluster_level {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.settings.cluster_resource_namespace)
        }
    }

    /// Watches Issuers in all namespaces and the secrets they reference.
    pub async fn watch_issuers(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(Api::<Issuer>::all(self.client.clone()), watcher::Config::default());
        let issuers = controller.store();
        let settings = self.settings.clone();
        let controller = controller.watches(self.secrets_api(), watcher::Config::default(), move |secret: Secret| {
            let secret_namespace = secret.namespace().unwrap_or_default();
            let secret_name = secret.name_any();
            issuers
                .state()
                .into_iter()
                .filter(|issuer| {
                    issuer_uses_secret(
                        IssuerKind::Issuer,
                        issuer.namespace().as_deref(),
                        &issuer.spec,
                        &secret_namespace,
                        &secret_name,
                        &settings,
                    )
                })
                .map(|issuer| ObjectRef::from_obj(&*issuer))
                .collect::<Vec<_>>()
        });

        let ctx = self.context(&self.issuers, "issuer");
        run_controller(controller, ctx, |issuer: Arc<Issuer>, ctx: Arc<Context<IssuerReconciler>>| async move {
            let namespace = issuer.namespace();
            timed(&ctx, ctx.reconciler.reconcile(namespace.as_deref(), &issuer.name_any())).await
        })
        .await;
        Err(ControllerError::Watch("Issuer controller stopped".to_string()))
    }

    /// Watches ClusterIssuers and the secrets they reference.
    pub async fn watch_cluster_issuers(&self) -> Result<(), ControllerError> {
        let controller =
            Controller::new(Api::<ClusterIssuer>::all(self.client.clone()), watcher::Config::default());
        let issuers = controller.store();
        let settings = self.settings.clone();
        let controller = controller.watches(self.secrets_api(), watcher::Config::default(), move |secret: Secret| {
            let secret_namespace = secret.namespace().unwrap_or_default();
            let secret_name = secret.name_any();
            issuers
                .state()
                .into_iter()
                .filter(|issuer| {
                    issuer_uses_secret(
                        IssuerKind::ClusterIssuer,
                        None,
                        &issuer.spec.issuer,
                        &secret_namespace,
                        &secret_name,
                        &settings,
                    )
                })
                .map(|issuer| ObjectRef::from_obj(&*issuer))
                .collect::<Vec<_>>()
        });

        let ctx = self.context(&self.cluster_issuers, "clusterissuer");
        run_controller(
            controller,
            ctx,
            |issuer: Arc<ClusterIssuer>, ctx: Arc<Context<IssuerReconciler>>| async move {
                timed(&ctx, ctx.reconciler.reconcile(None, &issuer.name_any())).await
            },
        )
        .await;
        Err(ControllerError::Watch("ClusterIssuer controller stopped".to_string()))
    }

    /// Watches CertificateRequests and wakes them when their issuer changes.
    pub async fn watch_certificate_requests(&self) -> Result<(), ControllerError> {
        let controller =
            Controller::new(Api::<CertificateRequest>::all(self.client.clone()), watcher::Config::default());
        let requests = controller.store();

        let controller = controller
            .watches(Api::<Issuer>::all(self.client.clone()), watcher::Config::default(), {
                let requests = requests.clone();
                let scheme = Arc::clone(&self.scheme);
                move |issuer: Issuer| {
                    let namespace = issuer.namespace();
                    requests_for_issuer(&requests, &scheme, IssuerKind::Issuer, namespace.as_deref(), &issuer.name_any())
                }
            })
            .watches(Api::<ClusterIssuer>::all(self.client.clone()), watcher::Config::default(), {
                let scheme = Arc::clone(&self.scheme);
                move |issuer: ClusterIssuer| {
                    requests_for_issuer(&requests, &scheme, IssuerKind::ClusterIssuer, None, &issuer.name_any())
                }
            });

        let ctx = self.context(&self.requests, "certificaterequest");
        run_controller(
            controller,
            ctx,
            |request: Arc<CertificateRequest>, ctx: Arc<Context<CertificateRequestReconciler>>| async move {
                let namespace = request.namespace().unwrap_or_default();
                timed(&ctx, ctx.reconciler.reconcile(&namespace, &request.name_any())).await
            },
        )
        .await;
        Err(ControllerError::Watch("CertificateRequest controller stopped".to_string()))
    }
}
