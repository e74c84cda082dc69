//! Test utilities for unit testing reconcilers
//!
//! In-memory stand-ins for the Kubernetes API and the CA, plus helpers for
//! creating test resources.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use crds::*;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::config::ReconcilerSettings;
use crate::config_client::{ConfigClient, SecretData};
use crate::error::ControllerError;
use crate::signer::{
    HealthChecker, HealthCheckerBuilder, IssuerSecrets, SignRequest, SignedCertificate, Signer, SignerBuilder,
    SignerError,
};
use crate::store::{IssuerResource, Precondition, ResourceStore};

pub const LEAF_PEM: &str = "-----BEGIN CERTIFICATE-----\nTEVBRg==\n-----END CERTIFICATE-----\n";
pub const ROOT_PEM: &str = "-----BEGIN CERTIFICATE-----\nUk9PVA==\n-----END CERTIFICATE-----\n";
pub const CSR_PEM: &str = "-----BEGIN CERTIFICATE REQUEST-----\nQ1NS\n-----END CERTIFICATE REQUEST-----\n";

/// Fixed starting point for fake clocks.
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Settings with the approval check on and a short CA deadline.
pub fn test_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        cluster_resource_namespace: "cert-manager".to_string(),
        secret_access_granted_at_cluster_level: false,
        check_approved_condition: true,
        ca_request_timeout: Duration::from_millis(200),
        health_check_interval: Duration::from_secs(60),
        retry: RetryPolicy::default(),
    }
}

/// Helper to create a complete issuer spec
pub fn create_test_issuer_spec() -> IssuerSpec {
    IssuerSpec {
        hostname: "ca.example.com".to_string(),
        api_path: DEFAULT_API_PATH.to_string(),
        command_secret_name: "command-credentials".to_string(),
        ca_secret_name: None,
        secret_namespace: None,
        certificate_template: "WebServer".to_string(),
        certificate_authority_logical_name: "Issuing-CA".to_string(),
        certificate_authority_hostname: None,
        scopes: None,
        audience: None,
    }
}

/// Helper to create an issuer view, optionally already Ready
pub fn create_test_issuer(kind: IssuerKind, namespace: Option<&str>, name: &str, ready: bool) -> IssuerResource {
    let mut status = IssuerStatus::default();
    if ready {
        set_condition(
            &mut status.conditions,
            CONDITION_READY,
            ConditionStatus::True,
            reasons::VERIFIED,
            "Issuer verified against the CA",
            Some(1),
            test_epoch(),
        );
    }
    IssuerResource {
        kind,
        name: name.to_string(),
        namespace: namespace.map(str::to_string),
        generation: Some(1),
        resource_version: Some("1".to_string()),
        spec: create_test_issuer_spec(),
        status,
    }
}

/// Helper to create a CertificateRequest created at `created`
pub fn create_test_certificate_request(
    namespace: &str,
    name: &str,
    issuer_kind: &str,
    issuer_name: &str,
    created: DateTime<Utc>,
) -> CertificateRequest {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "cert-manager.io/v1",
        "kind": "CertificateRequest",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "generation": 1,
            "resourceVersion": "1",
            "creationTimestamp": created.to_rfc3339(),
        },
        "spec": {
            "request": BASE64.encode(CSR_PEM),
            "duration": "2160h",
            "issuerRef": {
                "name": issuer_name,
                "kind": issuer_kind,
                "group": ISSUER_GROUP,
            },
            "usages": ["digital signature", "key encipherment"],
        },
    }))
    .unwrap()
}

/// Marks the request Approved (or Denied) the way an approver would.
pub fn decide(request: &mut CertificateRequest, approved: bool) {
    let status = request.status.get_or_insert_with(Default::default);
    let type_ = if approved { CONDITION_APPROVED } else { CONDITION_DENIED };
    set_condition(
        &mut status.conditions,
        type_,
        ConditionStatus::True,
        "policy.cert-manager.io",
        "decided by test",
        None,
        test_epoch(),
    );
}

/// Secret contents with basic credentials.
pub fn basic_credentials() -> SecretData {
    BTreeMap::from([
        ("username".to_string(), b"DOMAIN\\svc".to_vec()),
        ("password".to_string(), b"hunter2".to_vec()),
    ])
}

/// A status write seen by [`MockResourceStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub target: String,
    pub precondition: Precondition,
}

type IssuerKey = (IssuerKind, Option<String>, String);

/// In-memory [`ResourceStore`] with resourceVersion checks.
#[derive(Debug, Default)]
pub struct MockResourceStore {
    issuers: Mutex<HashMap<IssuerKey, IssuerResource>>,
    requests: Mutex<HashMap<(String, String), CertificateRequest>>,
    writes: Mutex<Vec<RecordedWrite>>,
    fail_next_write: Mutex<bool>,
    next_version: AtomicU64,
}

impl MockResourceStore {
    pub fn new() -> Self {
        Self {
            next_version: AtomicU64::new(100),
            ..Default::default()
        }
    }

    pub fn put_issuer(&self, issuer: IssuerResource) {
        let key = (issuer.kind, issuer.namespace.clone(), issuer.name.clone());
        self.issuers.lock().unwrap().insert(key, issuer);
    }

    pub fn issuer(&self, kind: IssuerKind, namespace: Option<&str>, name: &str) -> IssuerResource {
        let key = (kind, namespace.map(str::to_string), name.to_string());
        self.issuers.lock().unwrap().get(&key).cloned().unwrap()
    }

    pub fn put_request(&self, request: CertificateRequest) {
        let key = (request.namespace().unwrap_or_default(), request.name_any());
        self.requests.lock().unwrap().insert(key, request);
    }

    pub fn request(&self, namespace: &str, name: &str) -> CertificateRequest {
        let key = (namespace.to_string(), name.to_string());
        self.requests.lock().unwrap().get(&key).cloned().unwrap()
    }

    pub fn request_status(&self, namespace: &str, name: &str) -> CertificateRequestStatus {
        self.request(namespace, name).status.unwrap_or_default()
    }

    /// Simulates another writer bumping the request's resourceVersion.
    pub fn touch_request(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        let version = self.bump();
        if let Some(request) = self.requests.lock().unwrap().get_mut(&key) {
            request.metadata.resource_version = Some(version);
        }
    }

    /// Rejects the next guarded write with a conflict.
    pub fn fail_next_write(&self) {
        *self.fail_next_write.lock().unwrap() = true;
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    fn bump(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn check_version(&self, target: &str, expected: Option<&str>, current: Option<&str>) -> Result<(), ControllerError> {
        let forced = std::mem::take(&mut *self.fail_next_write.lock().unwrap());
        if forced || expected != current {
            return Err(ControllerError::Conflict(target.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MockResourceStore {
    async fn get_issuer(
        &self,
        kind: IssuerKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<IssuerResource>, ControllerError> {
        let key = (kind, namespace.map(str::to_string), name.to_string());
        Ok(self.issuers.lock().unwrap().get(&key).cloned())
    }

    async fn update_issuer_status(&self, issuer: &IssuerResource, status: &IssuerStatus) -> Result<(), ControllerError> {
        let target = issuer.display_name();
        let key = (issuer.kind, issuer.namespace.clone(), issuer.name.clone());
        let current = self.issuers.lock().unwrap().get(&key).and_then(|i| i.resource_version.clone());
        self.check_version(&target, issuer.resource_version.as_deref(), current.as_deref())?;

        let version = self.bump();
        let mut issuers = self.issuers.lock().unwrap();
        let stored = issuers.get_mut(&key).unwrap();
        stored.status = status.clone();
        stored.resource_version = Some(version);
        self.writes.lock().unwrap().push(RecordedWrite {
            target,
            precondition: Precondition::ResourceVersion,
        });
        Ok(())
    }

    async fn get_certificate_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CertificateRequest>, ControllerError> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.requests.lock().unwrap().get(&key).cloned())
    }

    async fn update_certificate_request_status(
        &self,
        request: &CertificateRequest,
        status: &CertificateRequestStatus,
        precondition: Precondition,
    ) -> Result<(), ControllerError> {
        let key = (request.namespace().unwrap_or_default(), request.name_any());
        let target = format!("CertificateRequest {}/{}", key.0, key.1);
        if precondition == Precondition::ResourceVersion {
            let current = self.requests.lock().unwrap().get(&key).and_then(|r| r.resource_version());
            self.check_version(&target, request.resource_version().as_deref(), current.as_deref())?;
        }

        let version = self.bump();
        let mut requests = self.requests.lock().unwrap();
        let stored = requests.get_mut(&key).unwrap();
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(version);
        self.writes.lock().unwrap().push(RecordedWrite { target, precondition });
        Ok(())
    }
}

/// In-memory [`ConfigClient`] that logs every lookup.
#[derive(Debug, Default)]
pub struct MockConfigClient {
    secrets: Mutex<HashMap<(String, String), SecretData>>,
    lookups: Mutex<Vec<(String, String)>>,
}

impl MockConfigClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_secret(&self, namespace: &str, name: &str, data: SecretData) {
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn remove_secret(&self, namespace: &str, name: &str) {
        self.secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn lookups(&self) -> Vec<(String, String)> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigClient for MockConfigClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, ControllerError> {
        let key = (namespace.to_string(), name.to_string());
        self.lookups.lock().unwrap().push(key.clone());
        Ok(self.secrets.lock().unwrap().get(&key).cloned())
    }
}

#[derive(Debug, Default)]
struct FakeCaState {
    sign_results: Mutex<VecDeque<Result<SignedCertificate, SignerError>>>,
    health: Mutex<Option<SignerError>>,
    build_error: Mutex<Option<SignerError>>,
    delay: Mutex<Option<Duration>>,
    sign_calls: AtomicUsize,
    health_calls: AtomicUsize,
    requests: Mutex<Vec<SignRequest>>,
    built_for: Mutex<Vec<IssuerSecrets>>,
}

/// Scripted CA behind the signer and health checker builders.
///
/// Signing succeeds with a leaf plus root chain unless results were queued.
#[derive(Debug, Clone, Default)]
pub struct FakeCa {
    state: Arc<FakeCaState>,
}

impl FakeCa {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_sign_result(&self, result: Result<SignedCertificate, SignerError>) {
        self.state.sign_results.lock().unwrap().push_back(result);
    }

    pub fn set_health(&self, failure: Option<SignerError>) {
        *self.state.health.lock().unwrap() = failure;
    }

    pub fn set_build_error(&self, error: Option<SignerError>) {
        *self.state.build_error.lock().unwrap() = error;
    }

    /// Every CA call sleeps this long first.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn sign_calls(&self) -> usize {
        self.state.sign_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.state.health_calls.load(Ordering::SeqCst)
    }

    pub fn sign_requests(&self) -> Vec<SignRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn built_for(&self) -> Vec<IssuerSecrets> {
        self.state.built_for.lock().unwrap().clone()
    }

    fn build(&self, secrets: &IssuerSecrets) -> Result<FakeCa, SignerError> {
        self.state.built_for.lock().unwrap().push(secrets.clone());
        match self.state.build_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(self.clone()),
        }
    }

    async fn pause(&self) {
        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn signer_builder(&self) -> SignerBuilder {
        let ca = self.clone();
        Arc::new(move |_spec: &IssuerSpec, secrets: &IssuerSecrets| {
            ca.build(secrets).map(|ca| Box::new(ca) as Box<dyn Signer>)
        })
    }

    pub fn health_checker_builder(&self) -> HealthCheckerBuilder {
        let ca = self.clone();
        Arc::new(move |_spec: &IssuerSpec, secrets: &IssuerSecrets| {
            ca.build(secrets).map(|ca| Box::new(ca) as Box<dyn HealthChecker>)
        })
    }
}

#[async_trait]
impl Signer for FakeCa {
    async fn sign(&self, request: SignRequest) -> Result<SignedCertificate, SignerError> {
        self.state.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.state.requests.lock().unwrap().push(request);
        self.pause().await;
        let queued = self.state.sign_results.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(SignedCertificate {
                chain_pem: LEAF_PEM.to_string(),
                ca_pem: ROOT_PEM.to_string(),
            })
        })
    }
}

#[async_trait]
impl HealthChecker for FakeCa {
    async fn check(&self) -> Result<(), SignerError> {
        self.state.health_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        match self.state.health.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
