//! CertificateRequest reconciliation
//!
//! The lifecycle is read from the `Ready` condition on every pass:
//!
//! ```text
//! (none) -> Pending -> Issued | Denied | Failed
//! ```
//!
//! `Pending` covers waiting for approval, for the issuer, and for a retry
//! after a transient CA failure. The three other reasons are terminal.
//!
//! A CSR is only ever submitted from `Pending`, and every status write
//! that follows a CA answer is unconditional, so a lost write race can
//! never send an answered CSR to the CA again.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use crds::{
    find_condition, reasons, set_condition, CertificateRequest, CertificateRequestStatus, ConditionStatus,
    IssuerKind, Scheme, CONDITION_APPROVED, CONDITION_READY,
};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{load_issuer_secrets, Requeue};
use crate::clock::Clock;
use crate::config::ReconcilerSettings;
use crate::config_client::ConfigClient;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconcile_helpers::{creation_time, elapsed_since, enrollment_metadata, format_duration};
use crate::signer::{SignRequest, SignerBuilder, SignerError};
use crate::store::{Precondition, ResourceStore};

/// Result of the approval check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalGate {
    /// Continue to the issuer and signing steps
    Proceed,
    /// No decision yet, wait for the approver
    AwaitApproval,
    /// The approver denied the request
    Denied,
}

/// Approval decision for a non-terminal request.
///
/// Without `check_approved` every request proceeds.
pub fn approval_gate(status: &CertificateRequestStatus, check_approved: bool) -> ApprovalGate {
    if !check_approved {
        return ApprovalGate::Proceed;
    }
    if status.is_denied() {
        ApprovalGate::Denied
    } else if status.is_approved() {
        ApprovalGate::Proceed
    } else {
        ApprovalGate::AwaitApproval
    }
}

/// Reconciles cert-manager CertificateRequests that reference our issuers.
pub struct CertificateRequestReconciler {
    store: Arc<dyn ResourceStore>,
    config_client: Arc<dyn ConfigClient>,
    signer_builder: SignerBuilder,
    clock: Arc<dyn Clock>,
    scheme: Arc<Scheme>,
    metrics: Arc<Metrics>,
    settings: ReconcilerSettings,
}

impl std::fmt::Debug for CertificateRequestReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRequestReconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// One pass over a single request.
struct Pass<'a> {
    request: &'a CertificateRequest,
    original: CertificateRequestStatus,
    status: CertificateRequestStatus,
    now: DateTime<Utc>,
}

impl CertificateRequestReconciler {
    /// Creates the reconciler.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        config_client: Arc<dyn ConfigClient>,
        signer_builder: SignerBuilder,
        clock: Arc<dyn Clock>,
        scheme: Arc<Scheme>,
        metrics: Arc<Metrics>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            config_client,
            signer_builder,
            clock,
            scheme,
            metrics,
            settings,
        }
    }

    /// Reconciles the CertificateRequest `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Requeue, ControllerError> {
        let Some(request) = self.store.get_certificate_request(namespace, name).await? else {
            debug!(namespace = %namespace, name = %name, "CertificateRequest not found, assuming it was deleted");
            return Ok(Requeue::AwaitChange);
        };

        let issuer_ref = &request.spec.issuer_ref;
        let Some(issuer_kind) = self
            .scheme
            .issuer_kind(issuer_ref.group.as_deref(), issuer_ref.kind.as_deref())
        else {
            debug!(
                namespace = %namespace,
                name = %name,
                group = ?issuer_ref.group,
                kind = ?issuer_ref.kind,
                "CertificateRequest references a foreign issuer, ignoring"
            );
            return Ok(Requeue::AwaitChange);
        };

        let original = request.status.clone().unwrap_or_default();
        if original.is_terminal() {
            debug!(namespace = %namespace, name = %name, reason = ?original.ready_reason(), "CertificateRequest is terminal");
            return Ok(Requeue::AwaitChange);
        }

        let mut pass = Pass {
            request: &request,
            status: original.clone(),
            original,
            now: self.clock.now(),
        };
        if pass.status.ready_condition().is_none() {
            self.set_ready(&mut pass, ConditionStatus::False, reasons::PENDING, "Initialising Ready condition");
        }

        match approval_gate(&pass.status, self.settings.check_approved_condition) {
            ApprovalGate::Proceed => {}
            ApprovalGate::AwaitApproval => {
                debug!(namespace = %namespace, name = %name, "Waiting for the request to be approved");
                self.write(&pass, Precondition::ResourceVersion).await?;
                return Ok(Requeue::AwaitChange);
            }
            ApprovalGate::Denied => {
                info!(namespace = %namespace, name = %name, "CertificateRequest was denied");
                self.set_ready(
                    &mut pass,
                    ConditionStatus::False,
                    reasons::DENIED,
                    "The CertificateRequest was denied by an approval controller",
                );
                pass.status.failure_time = Some(pass.now);
                self.write(&pass, Precondition::ResourceVersion).await?;
                return Ok(Requeue::AwaitChange);
            }
        }

        self.issue(issuer_kind, pass).await
    }

    async fn issue(&self, issuer_kind: IssuerKind, mut pass: Pass<'_>) -> Result<Requeue, ControllerError> {
        let request = pass.request;
        let namespace = request.namespace().unwrap_or_default();
        let issuer_name = &request.spec.issuer_ref.name;
        let elapsed = elapsed_since(pass.now, creation_time(&request.metadata));
        let backoff = self.settings.retry.requeue_after(elapsed);

        let issuer_namespace = match issuer_kind {
            IssuerKind::Issuer => Some(namespace.as_str()),
            IssuerKind::ClusterIssuer => None,
        };
        let issuer = match self.store.get_issuer(issuer_kind, issuer_namespace, issuer_name).await? {
            Some(issuer) if issuer.status.is_ready() => issuer,
            Some(issuer) => {
                let message = format!("{} is not Ready", issuer.display_name());
                return self.pending(pass, reasons::ISSUER_NOT_READY, message, backoff).await;
            }
            None => {
                let message = format!("{issuer_kind} {issuer_name} not found");
                return self.pending(pass, reasons::ISSUER_NOT_READY, message, backoff).await;
            }
        };

        let secrets = match load_issuer_secrets(self.config_client.as_ref(), &issuer, &self.settings).await? {
            Ok(secrets) => secrets,
            Err(e) => {
                let message = format!("issuer secrets unavailable: {e}");
                return self.pending(pass, reasons::PENDING, message, backoff).await;
            }
        };

        let csr_pem = match BASE64.decode(request.spec.request.trim()) {
            Ok(csr) if !csr.is_empty() => csr,
            Ok(_) => return self.fail(pass, "spec.request is empty".to_string(), Precondition::ResourceVersion).await,
            Err(e) => {
                let message = format!("spec.request is not valid base64: {e}");
                return self.fail(pass, message, Precondition::ResourceVersion).await;
            }
        };
        let duration = match request.spec.requested_duration() {
            Ok(duration) => duration,
            Err(e) => return self.fail(pass, e.to_string(), Precondition::ResourceVersion).await,
        };

        let signer = match (self.signer_builder)(&issuer.spec, &secrets) {
            Ok(signer) => signer,
            Err(e) => {
                let message = format!("failed to build signer: {e}");
                return self.pending(pass, reasons::PENDING, message, backoff).await;
            }
        };

        // Time spent waiting for approval or for the issuer does not use up the retry budget.
        let signable_since = [
            creation_time(&request.metadata),
            self.approved_at(&pass.status),
            issuer
                .status
                .ready_condition()
                .filter(|c| c.status == ConditionStatus::True)
                .and_then(|c| c.last_transition_time),
        ]
        .into_iter()
        .flatten()
        .max();
        let signing_elapsed = elapsed_since(pass.now, signable_since);

        let sign_request = SignRequest {
            csr_pem,
            duration,
            usages: request.spec.usages.clone(),
            is_ca: request.spec.is_ca,
            metadata: enrollment_metadata(request.annotations()),
        };
        let timeout = self.settings.ca_request_timeout;
        let result = tokio::time::timeout(timeout, signer.sign(sign_request))
            .await
            .unwrap_or_else(|_| {
                Err(SignerError::Transient(format!(
                    "signing timed out after {}",
                    format_duration(timeout)
                )))
            });

        match result {
            Ok(signed) => {
                pass.status.certificate = Some(BASE64.encode(signed.chain_pem.as_bytes()));
                pass.status.ca = (!signed.ca_pem.is_empty()).then(|| BASE64.encode(signed.ca_pem.as_bytes()));
                pass.status.failure_time = None;
                self.set_ready(&mut pass, ConditionStatus::True, reasons::ISSUED, "Signed");
                self.write(&pass, Precondition::Unconditional).await?;
                self.metrics.record_certificate_issued();
                info!(namespace = %namespace, name = %request.name_any(), issuer = %issuer.display_name(), "Certificate issued");
                Ok(Requeue::AwaitChange)
            }
            Err(SignerError::Permanent(message)) => {
                self.fail(pass, format!("CA rejected the request: {message}"), Precondition::Unconditional).await
            }
            Err(e) if self.settings.retry.is_exhausted(signing_elapsed) => {
                let message = format!("giving up after {}: {e}", format_duration(signing_elapsed));
                self.fail(pass, message, Precondition::Unconditional).await
            }
            Err(e) => {
                let message = format!("signing failed, will retry: {e}");
                let backoff = self.settings.retry.requeue_after(signing_elapsed);
                self.pending(pass, reasons::PENDING, message, backoff).await
            }
        }
    }

    /// When the request was approved, if approval gates signing.
    fn approved_at(&self, status: &CertificateRequestStatus) -> Option<DateTime<Utc>> {
        if !self.settings.check_approved_condition {
            return None;
        }
        find_condition(&status.conditions, CONDITION_APPROVED)
            .filter(|c| c.status == ConditionStatus::True)
            .and_then(|c| c.last_transition_time)
    }

    fn set_ready(&self, pass: &mut Pass<'_>, status: ConditionStatus, reason: &str, message: impl Into<String>) {
        set_condition(
            &mut pass.status.conditions,
            CONDITION_READY,
            status,
            reason,
            message,
            pass.request.metadata.generation,
            pass.now,
        );
    }

    /// Non-terminal `Ready=False`, retried after `backoff`.
    async fn pending(
        &self,
        mut pass: Pass<'_>,
        reason: &'static str,
        message: String,
        backoff: Duration,
    ) -> Result<Requeue, ControllerError> {
        warn!(
            namespace = ?pass.request.namespace(),
            name = %pass.request.name_any(),
            reason = reason,
            message = %message,
            retry_in_secs = backoff.as_secs(),
            "CertificateRequest not issued yet"
        );
        self.set_ready(&mut pass, ConditionStatus::False, reason, message);
        self.write(&pass, Precondition::ResourceVersion).await?;
        Ok(Requeue::After(backoff))
    }

    /// Terminal `Ready=False, reason=Failed`.
    async fn fail(&self, mut pass: Pass<'_>, message: String, precondition: Precondition) -> Result<Requeue, ControllerError> {
        warn!(
            namespace = ?pass.request.namespace(),
            name = %pass.request.name_any(),
            message = %message,
            "CertificateRequest failed"
        );
        self.set_ready(&mut pass, ConditionStatus::False, reasons::FAILED, message);
        pass.status.failure_time = Some(pass.now);
        self.write(&pass, precondition).await?;
        Ok(Requeue::AwaitChange)
    }

    /// Persists the status when it differs from what was read.
    async fn write(&self, pass: &Pass<'_>, precondition: Precondition) -> Result<(), ControllerError> {
        if pass.status == pass.original {
            return Ok(());
        }
        self.store
            .update_certificate_request_status(pass.request, &pass.status, precondition)
            .await
    }
}
