//! Signer and health checker capabilities
//!
//! Reconcilers never talk to the CA directly. They build a [`Signer`] or
//! [`HealthChecker`] from the issuer spec and its resolved secrets through
//! an injected builder, use it for one reconcile, and drop it. Credentials
//! are therefore always the current ones.

pub mod command;

use async_trait::async_trait;
use command_client::CommandError;
use crds::IssuerSpec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config_client::SecretData;

/// Secrets referenced by an issuer, already fetched.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IssuerSecrets {
    /// Contents of `commandSecretName`
    pub credentials: SecretData,
    /// Contents of `caSecretName`, if set
    pub ca: Option<SecretData>,
}

impl std::fmt::Debug for IssuerSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerSecrets")
            .field("credential_keys", &self.credentials.keys().collect::<Vec<_>>())
            .field("ca", &self.ca.is_some())
            .finish()
    }
}

/// What to sign.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignRequest {
    /// PEM encoded CSR
    pub csr_pem: Vec<u8>,
    /// Requested validity
    pub duration: Option<Duration>,
    /// Requested key usages
    pub usages: Vec<String>,
    /// CA certificate requested
    pub is_ca: bool,
    /// Enrollment metadata fields
    pub metadata: BTreeMap<String, String>,
}

/// A signed certificate split the way cert-manager stores it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignedCertificate {
    /// Leaf followed by intermediates, PEM
    pub chain_pem: String,
    /// Top of the returned chain, PEM; empty when the CA returned only the leaf
    pub ca_pem: String,
}

/// Classified signer and health checker failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// May succeed if retried later
    #[error("transient CA error: {0}")]
    Transient(String),

    /// The CA answered and will not sign this request
    #[error("CA rejected the request: {0}")]
    Permanent(String),

    /// Issuer spec or secrets cannot be used to reach the CA
    #[error("invalid issuer configuration: {0}")]
    Config(String),
}

impl From<CommandError> for SignerError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::Configuration(message) => SignerError::Config(message),
            other if other.is_transient() => SignerError::Transient(other.to_string()),
            other => SignerError::Permanent(other.to_string()),
        }
    }
}

/// Submits CSRs to the CA.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signs one request.
    async fn sign(&self, request: SignRequest) -> Result<SignedCertificate, SignerError>;
}

/// Verifies an issuer's configuration against the CA.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Succeeds when the CA is reachable with these credentials.
    async fn check(&self) -> Result<(), SignerError>;
}

/// Builds a [`Signer`] from an issuer spec and its secrets.
pub type SignerBuilder =
    Arc<dyn Fn(&IssuerSpec, &IssuerSecrets) -> Result<Box<dyn Signer>, SignerError> + Send + Sync>;

/// Builds a [`HealthChecker`] from an issuer spec and its secrets.
pub type HealthCheckerBuilder =
    Arc<dyn Fn(&IssuerSpec, &IssuerSecrets) -> Result<Box<dyn HealthChecker>, SignerError> + Send + Sync>;

/// Splits a CA response (leaf first) into chain and CA parts.
///
/// With more than one certificate the last one is the CA and the rest is
/// the chain. A lone certificate is the chain with no CA.
pub fn split_chain(certificates: &[String]) -> SignedCertificate {
    match certificates {
        [] => SignedCertificate::default(),
        [leaf] => SignedCertificate {
            chain_pem: leaf.clone(),
            ca_pem: String::new(),
        },
        [chain @ .., ca] => SignedCertificate {
            chain_pem: chain.concat(),
            ca_pem: ca.clone(),
        },
    }
}
