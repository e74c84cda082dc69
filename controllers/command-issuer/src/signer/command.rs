//! Signer and health checker backed by the CA REST API.

use async_trait::async_trait;
use command_client::{
    CommandClient, CommandClientConfig, CommandClientTrait, Credentials, EnrollmentRequest,
};
use crds::IssuerSpec;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    split_chain, HealthChecker, HealthCheckerBuilder, IssuerSecrets, SignRequest, SignedCertificate,
    Signer, SignerBuilder, SignerError,
};
use crate::config_client::SecretData;

/// Key of the trusted CA bundle in `caSecretName`.
pub const CA_BUNDLE_KEY: &str = "ca.crt";

const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";
const CLIENT_ID_KEY: &str = "client_id";
const CLIENT_SECRET_KEY: &str = "client_secret";
const TOKEN_URL_KEY: &str = "token_url";

fn secret_string(data: &SecretData, key: &str) -> Result<Option<String>, SignerError> {
    match data.get(key) {
        None => Ok(None),
        Some(bytes) => {
            let value = String::from_utf8(bytes.clone())
                .map_err(|_| SignerError::Config(format!("secret key {key:?} is not valid UTF-8")))?;
            let value = value.trim().to_string();
            Ok((!value.is_empty()).then_some(value))
        }
    }
}

/// Reads basic-auth or OAuth client credentials from the credential secret.
///
/// Basic auth wins when both shapes are present.
pub fn credentials_from_secret(spec: &IssuerSpec, data: &SecretData) -> Result<Credentials, SignerError> {
    let username = secret_string(data, USERNAME_KEY)?;
    let password = secret_string(data, PASSWORD_KEY)?;
    if let (Some(username), Some(password)) = (username.clone(), password.clone()) {
        return Ok(Credentials::Basic { username, password });
    }

    let client_id = secret_string(data, CLIENT_ID_KEY)?;
    let client_secret = secret_string(data, CLIENT_SECRET_KEY)?;
    let token_url = secret_string(data, TOKEN_URL_KEY)?;
    if let (Some(client_id), Some(client_secret), Some(token_url)) = (client_id, client_secret, token_url) {
        let scopes = spec
            .scopes
            .as_deref()
            .unwrap_or_default()
            .split([' ', ','])
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        return Ok(Credentials::OAuth {
            client_id,
            client_secret,
            token_url,
            scopes,
            audience: spec.audience.clone().filter(|a| !a.is_empty()),
        });
    }

    if username.is_some() || password.is_some() {
        return Err(SignerError::Config(format!(
            "basic auth secret needs both {USERNAME_KEY:?} and {PASSWORD_KEY:?}"
        )));
    }
    Err(SignerError::Config(format!(
        "credential secret must contain {USERNAME_KEY:?}/{PASSWORD_KEY:?} or {CLIENT_ID_KEY:?}/{CLIENT_SECRET_KEY:?}/{TOKEN_URL_KEY:?}"
    )))
}

/// Validates the issuer spec and turns it plus its secrets into client settings.
pub fn client_config(
    spec: &IssuerSpec,
    secrets: &IssuerSecrets,
    timeout: Duration,
) -> Result<CommandClientConfig, SignerError> {
    if spec.hostname.trim().is_empty() {
        return Err(SignerError::Config("spec.hostname is required".to_string()));
    }
    let credentials = credentials_from_secret(spec, &secrets.credentials)?;
    let mut config = CommandClientConfig::new(&spec.hostname, &spec.api_path, credentials).with_timeout(timeout);
    if let Some(ca) = &secrets.ca {
        let bundle = secret_string(ca, CA_BUNDLE_KEY)?
            .ok_or_else(|| SignerError::Config(format!("CA secret has no {CA_BUNDLE_KEY:?} key")))?;
        config = config.with_ca_bundle(bundle);
    }
    Ok(config)
}

/// `host\\logical-name` when a CA host is set, else the logical name.
pub fn certificate_authority(spec: &IssuerSpec) -> String {
    match spec.certificate_authority_hostname.as_deref().filter(|h| !h.is_empty()) {
        Some(host) => format!("{host}\\{}", spec.certificate_authority_logical_name),
        None => spec.certificate_authority_logical_name.clone(),
    }
}

/// Enrolls CSRs through the CA API.
#[derive(Debug)]
pub struct CommandSigner<C> {
    client: C,
    template: String,
    certificate_authority: String,
}

impl<C: CommandClientTrait> CommandSigner<C> {
    /// Signer using `client` and the issuer's template and CA.
    pub fn new(client: C, spec: &IssuerSpec) -> Result<Self, SignerError> {
        if spec.certificate_template.trim().is_empty() {
            return Err(SignerError::Config("spec.certificateTemplate is required".to_string()));
        }
        if spec.certificate_authority_logical_name.trim().is_empty() {
            return Err(SignerError::Config(
                "spec.certificateAuthorityLogicalName is required".to_string(),
            ));
        }
        Ok(Self {
            client,
            template: spec.certificate_template.clone(),
            certificate_authority: certificate_authority(spec),
        })
    }
}

#[async_trait]
impl<C: CommandClientTrait> Signer for CommandSigner<C> {
    async fn sign(&self, request: SignRequest) -> Result<SignedCertificate, SignerError> {
        let csr_pem = String::from_utf8(request.csr_pem)
            .map_err(|_| SignerError::Permanent("CSR is not valid PEM text".to_string()))?;
        if let Some(duration) = request.duration {
            debug!(
                requested_secs = duration.as_secs(),
                template = %self.template,
                "Certificate lifetime is governed by the enrollment template"
            );
        }

        let issued = self
            .client
            .enroll_csr(EnrollmentRequest {
                csr_pem,
                template: self.template.clone(),
                certificate_authority: self.certificate_authority.clone(),
                metadata: request.metadata,
            })
            .await?;

        debug!(
            serial = ?issued.serial_number,
            certificate_id = ?issued.certificate_id,
            chain_len = issued.certificates.len(),
            "CA issued certificate"
        );
        Ok(split_chain(&issued.certificates))
    }
}

/// Probes the CA API with the issuer's credentials.
#[derive(Debug)]
pub struct CommandHealthChecker<C> {
    client: C,
}

impl<C: CommandClientTrait> CommandHealthChecker<C> {
    /// Health checker using `client`.
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: CommandClientTrait> HealthChecker for CommandHealthChecker<C> {
    async fn check(&self) -> Result<(), SignerError> {
        debug!(base_url = %self.client.base_url(), "Running CA health check");
        self.client.check_connection().await.map_err(|e| match SignerError::from(e) {
            // Any answer other than success means the issuer is not usable right now.
            SignerError::Permanent(message) => SignerError::Transient(message),
            other => other,
        })
    }
}

/// Builds a signer talking to the CA described by the issuer.
pub fn command_signer_from_issuer_and_secret_data(
    spec: &IssuerSpec,
    secrets: &IssuerSecrets,
    timeout: Duration,
) -> Result<Box<dyn Signer>, SignerError> {
    let client = CommandClient::new(client_config(spec, secrets, timeout)?)?;
    Ok(Box::new(CommandSigner::new(client, spec)?))
}

/// Builds a health checker for the CA described by the issuer.
pub fn command_health_checker_from_issuer_and_secret_data(
    spec: &IssuerSpec,
    secrets: &IssuerSecrets,
    timeout: Duration,
) -> Result<Box<dyn HealthChecker>, SignerError> {
    let client = CommandClient::new(client_config(spec, secrets, timeout)?)?;
    Ok(Box::new(CommandHealthChecker::new(client)))
}

/// [`SignerBuilder`] for the CA API with the given per-call timeout.
pub fn command_signer_builder(timeout: Duration) -> SignerBuilder {
    Arc::new(move |spec: &IssuerSpec, secrets: &IssuerSecrets| {
        command_signer_from_issuer_and_secret_data(spec, secrets, timeout)
    })
}

/// [`HealthCheckerBuilder`] for the CA API with the given per-call timeout.
pub fn command_health_checker_builder(timeout: Duration) -> HealthCheckerBuilder {
    Arc::new(move |spec: &IssuerSpec, secrets: &IssuerSecrets| {
        command_health_checker_from_issuer_and_secret_data(spec, secrets, timeout)
    })
}
