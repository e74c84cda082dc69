//! CA API client
//!
//! Implements the subset of the CA REST API an issuer needs:
//! `GET {base}/Status/Endpoints` as an authenticated health probe and
//! `POST {base}/Enrollment/CSR` for PEM enrollment.

use chrono::{SecondsFormat, Utc};
use reqwest::{Certificate, Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{Authenticator, Credentials};
use crate::command_trait::CommandClientTrait;
use crate::error::CommandError;
use crate::models::*;
use crate::pem::{ensure_pem, split_certificates};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`CommandClient`].
#[derive(Debug, Clone)]
pub struct CommandClientConfig {
    /// CA API host, with or without `https://`
    pub hostname: String,
    /// Path prefix of the REST API, e.g. `KeyfactorAPI`
    pub api_path: String,
    /// Authentication
    pub credentials: Credentials,
    /// Extra PEM roots trusted for the API's TLS certificate
    pub ca_bundle_pem: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl CommandClientConfig {
    /// Config with the default timeout and system trust roots.
    pub fn new(hostname: impl Into<String>, api_path: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            hostname: hostname.into(),
            api_path: api_path.into(),
            credentials,
            ca_bundle_pem: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Trusts the given PEM bundle in addition to the built-in roots.
    pub fn with_ca_bundle(mut self, pem: impl Into<String>) -> Self {
        self.ca_bundle_pem = Some(pem.into());
        self
    }

    /// Overrides the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL all endpoints hang off, e.g. `https://ca.example.com/KeyfactorAPI`.
    pub fn base_url(&self) -> String {
        let host = self.hostname.trim().trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        let path = self.api_path.trim().trim_matches('/');
        if path.is_empty() {
            host
        } else {
            format!("{host}/{path}")
        }
    }
}

/// CA API client
#[derive(Debug)]
pub struct CommandClient {
    client: Client,
    base_url: String,
    auth: Authenticator,
}

impl CommandClient {
    /// Create a new client
    ///
    /// Fails when the hostname is empty or the CA bundle holds no usable certificate.
    pub fn new(config: CommandClientConfig) -> Result<Self, CommandError> {
        if config.hostname.trim().is_empty() {
            return Err(CommandError::Configuration("hostname is empty".to_string()));
        }

        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(bundle) = config.ca_bundle_pem.as_deref() {
            let blocks = split_certificates(bundle);
            if blocks.is_empty() {
                return Err(CommandError::Configuration(
                    "CA bundle contains no PEM certificates".to_string(),
                ));
            }
            for block in blocks {
                let certificate = Certificate::from_pem(block.as_bytes()).map_err(|e| {
                    CommandError::Configuration(format!("invalid CA bundle certificate: {e}"))
                })?;
                builder = builder.add_root_certificate(certificate);
            }
        }
        let client = builder.build()?;

        Ok(Self {
            base_url: config.base_url(),
            client,
            auth: Authenticator::new(config.credentials),
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CommandError> {
        let request = self
            .auth
            .authorize(&self.client, request)
            .await?
            .header("Accept", "application/json")
            .header("x-keyfactor-requested-with", "APIClient")
            .header("x-keyfactor-api-version", "1");
        let response = request.send().await?;

        let status = response.status();
        if status == 401 || status == 403 {
            self.auth.invalidate().await;
            let body = response.text().await.unwrap_or_default();
            return Err(CommandError::Authentication(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CommandError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response)
    }

    /// Verifies the API is reachable and accepts the credentials.
    pub async fn check_connection(&self) -> Result<(), CommandError> {
        let url = format!("{}/Status/Endpoints", self.base_url);
        debug!(url = %url, "Checking CA API connectivity");
        self.send(self.client.get(&url)).await?;
        Ok(())
    }

    /// Enrolls a PEM CSR and returns the issued certificate with its chain.
    ///
    /// A response whose disposition is not `ISSUED` is a
    /// [`CommandError::Disposition`].
    pub async fn enroll_csr(&self, request: EnrollmentRequest) -> Result<IssuedCertificate, CommandError> {
        if request.csr_pem.trim().is_empty() {
            return Err(CommandError::InvalidRequest("CSR is empty".to_string()));
        }

        let url = format!("{}/Enrollment/CSR", self.base_url);
        let body = EnrollmentBody {
            csr: &request.csr_pem,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            template: &request.template,
            certificate_authority: &request.certificate_authority,
            include_chain: true,
            metadata: &request.metadata,
        };

        debug!(
            url = %url,
            template = %request.template,
            certificate_authority = %request.certificate_authority,
            "Submitting CSR enrollment"
        );
        let response = self
            .send(
                self.client
                    .post(&url)
                    .header("x-certificateformat", "PEM")
                    .json(&body),
            )
            .await?;

        // The CA has answered; any failure from here on must not lead to a resubmission.
        let text = response
            .text()
            .await
            .map_err(|e| CommandError::UnreadableEnrollment(e.to_string()))?;
        decode_enrollment(&text)
    }
}

fn decode_enrollment(body: &str) -> Result<IssuedCertificate, CommandError> {
    let parsed: EnrollmentResponse =
        serde_json::from_str(body).map_err(|e| CommandError::UnreadableEnrollment(e.to_string()))?;
    issued_from_information(parsed.certificate_information)
}

fn issued_from_information(info: CertificateInformation) -> Result<IssuedCertificate, CommandError> {
    if !info.request_disposition.eq_ignore_ascii_case(DISPOSITION_ISSUED) {
        return Err(CommandError::Disposition {
            disposition: info.request_disposition,
            message: info.disposition_message.unwrap_or_default(),
        });
    }

    // Some CA versions return the whole chain as one PEM blob.
    let certificates: Vec<String> = info
        .certificates
        .iter()
        .flat_map(|c| {
            let blocks = split_certificates(c);
            if blocks.is_empty() {
                vec![ensure_pem(c)]
            } else {
                blocks
            }
        })
        .collect();

    if certificates.is_empty() {
        warn!("CA reported ISSUED without returning a certificate");
        return Err(CommandError::Disposition {
            disposition: info.request_disposition,
            message: "enrollment issued but no certificate returned".to_string(),
        });
    }

    Ok(IssuedCertificate {
        certificates,
        serial_number: info.serial_number,
        thumbprint: info.thumbprint,
        certificate_id: info.keyfactor_id,
        request_id: info.keyfactor_request_id,
    })
}

#[async_trait::async_trait]
impl CommandClientTrait for CommandClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_connection(&self) -> Result<(), CommandError> {
        CommandClient::check_connection(self).await
    }

    async fn enroll_csr(&self, request: EnrollmentRequest) -> Result<IssuedCertificate, CommandError> {
        CommandClient::enroll_csr(self, request).await
    }
}
