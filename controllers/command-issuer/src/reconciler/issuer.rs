//! Issuer and ClusterIssuer reconciliation
//!
//! Resolves the issuer's secrets, builds a health checker from them, runs
//! it under the CA deadline and publishes the outcome on `Ready`.

use chrono::{DateTime, Utc};
use crds::{reasons, set_condition, ConditionStatus, IssuerKind, CONDITION_READY};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{load_issuer_secrets, Requeue};
use crate::clock::Clock;
use crate::config::ReconcilerSettings;
use crate::config_client::ConfigClient;
use crate::error::{ConfigError, ControllerError};
use crate::reconcile_helpers::{elapsed_since, format_duration};
use crate::signer::{HealthCheckerBuilder, SignerError};
use crate::store::{IssuerResource, ResourceStore};

/// Next `Ready` condition and requeue decision for an issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Verdict {
    status: ConditionStatus,
    reason: &'static str,
    message: String,
    requeue: Requeue,
}

/// Reconciles one issuer kind.
pub struct IssuerReconciler {
    kind: IssuerKind,
    store: Arc<dyn ResourceStore>,
    config_client: Arc<dyn ConfigClient>,
    health_checker_builder: HealthCheckerBuilder,
    clock: Arc<dyn Clock>,
    settings: ReconcilerSettings,
}

impl std::fmt::Debug for IssuerReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerReconciler")
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl IssuerReconciler {
    /// Reconciler for `kind`.
    pub fn new(
        kind: IssuerKind,
        store: Arc<dyn ResourceStore>,
        config_client: Arc<dyn ConfigClient>,
        health_checker_builder: HealthCheckerBuilder,
        clock: Arc<dyn Clock>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            kind,
            store,
            config_client,
            health_checker_builder,
            clock,
            settings,
        }
    }

    /// Kind this reconciler handles.
    pub fn kind(&self) -> IssuerKind {
        self.kind
    }

    /// Reconciles the issuer `name` (in `namespace` for a namespaced Issuer).
    pub async fn reconcile(&self, namespace: Option<&str>, name: &str) -> Result<Requeue, ControllerError> {
        let Some(issuer) = self.store.get_issuer(self.kind, namespace, name).await? else {
            debug!(kind = %self.kind, namespace = ?namespace, name = %name, "Issuer not found, assuming it was deleted");
            return Ok(Requeue::AwaitChange);
        };

        let now = self.clock.now();
        let verdict = self.evaluate(&issuer, now).await?;

        let mut status = issuer.status.clone();
        let changed = set_condition(
            &mut status.conditions,
            CONDITION_READY,
            verdict.status,
            verdict.reason,
            verdict.message.clone(),
            issuer.generation,
            now,
        );
        if changed {
            info!(
                issuer = %issuer.display_name(),
                status = ?verdict.status,
                reason = verdict.reason,
                message = %verdict.message,
                "Updating issuer Ready condition"
            );
            self.store.update_issuer_status(&issuer, &status).await?;
        } else {
            debug!(issuer = %issuer.display_name(), "Issuer status unchanged");
        }

        Ok(verdict.requeue)
    }

    async fn evaluate(&self, issuer: &IssuerResource, now: DateTime<Utc>) -> Result<Verdict, ControllerError> {
        let secrets = match load_issuer_secrets(self.config_client.as_ref(), issuer, &self.settings).await? {
            Ok(secrets) => secrets,
            Err(e) => {
                warn!(issuer = %issuer.display_name(), error = %e, "Issuer secrets unusable");
                let reason = if e.is_not_found() {
                    reasons::SECRET_NOT_FOUND
                } else {
                    reasons::CONFIG_ERROR
                };
                // No Secret event will announce this one, so look again slowly.
                let requeue = match &e {
                    ConfigError::SecretNotFound { namespace, .. } if !self.settings.watches_secrets_in(namespace) => {
                        Requeue::After(self.settings.retry.max_interval)
                    }
                    _ => Requeue::AwaitChange,
                };
                return Ok(Verdict {
                    status: ConditionStatus::False,
                    reason,
                    message: e.to_string(),
                    requeue,
                });
            }
        };

        let checker = match (self.health_checker_builder)(&issuer.spec, &secrets) {
            Ok(checker) => checker,
            Err(SignerError::Config(message)) => {
                warn!(issuer = %issuer.display_name(), error = %message, "Issuer configuration invalid");
                return Ok(Verdict {
                    status: ConditionStatus::False,
                    reason: reasons::CONFIG_ERROR,
                    message,
                    requeue: Requeue::AwaitChange,
                });
            }
            Err(e) => return Ok(self.health_check_failed(issuer, now, e.to_string())),
        };

        let timeout = self.settings.ca_request_timeout;
        match tokio::time::timeout(timeout, checker.check()).await {
            Ok(Ok(())) => Ok(Verdict {
                status: ConditionStatus::True,
                reason: reasons::VERIFIED,
                message: "Issuer verified against the CA".to_string(),
                requeue: Requeue::After(self.settings.health_check_interval),
            }),
            Ok(Err(e)) => Ok(self.health_check_failed(issuer, now, format!("health check failed: {e}"))),
            Err(_) => Ok(self.health_check_failed(
                issuer,
                now,
                format!("health check timed out after {}", format_duration(timeout)),
            )),
        }
    }

    /// Failure verdict, backing off by how long the issuer has been not Ready.
    fn health_check_failed(&self, issuer: &IssuerResource, now: DateTime<Utc>, message: String) -> Verdict {
        let failing_since = issuer
            .status
            .ready_condition()
            .filter(|c| c.status == ConditionStatus::False)
            .and_then(|c| c.last_transition_time);
        let delay = self.settings.retry.requeue_after(elapsed_since(now, failing_since));
        warn!(
            issuer = %issuer.display_name(),
            error = %message,
            retry_in_secs = delay.as_secs(),
            "Issuer health check failed"
        );
        Verdict {
            status: ConditionStatus::False,
            reason: reasons::HEALTH_CHECK_FAILED,
            message,
            requeue: Requeue::After(delay),
        }
    }
}
