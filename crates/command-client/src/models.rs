//! CA API request and response models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Disposition the CA reports for an enrollment that produced a certificate.
pub const DISPOSITION_ISSUED: &str = "ISSUED";

/// A PEM CSR enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnrollmentRequest {
    /// PEM encoded PKCS#10 request
    pub csr_pem: String,
    /// Certificate template short name
    pub template: String,
    /// `host\\logical-name` or just the logical name
    pub certificate_authority: String,
    /// Custom metadata fields attached to the certificate
    pub metadata: BTreeMap<String, String>,
}

/// Wire body of `POST /Enrollment/CSR`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EnrollmentBody<'a> {
    #[serde(rename = "CSR")]
    pub csr: &'a str,
    pub timestamp: String,
    pub template: &'a str,
    pub certificate_authority: &'a str,
    pub include_chain: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: &'a BTreeMap<String, String>,
}

/// Wire response of `POST /Enrollment/CSR`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EnrollmentResponse {
    pub certificate_information: CertificateInformation,
}

/// Certificate details returned by an enrollment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CertificateInformation {
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub thumbprint: Option<String>,
    #[serde(default, rename = "KeyfactorID")]
    pub keyfactor_id: Option<u64>,
    #[serde(default)]
    pub keyfactor_request_id: Option<u64>,
    #[serde(default)]
    pub certificates: Vec<String>,
    #[serde(default)]
    pub request_disposition: String,
    #[serde(default)]
    pub disposition_message: Option<String>,
}

/// A certificate issued by the CA.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IssuedCertificate {
    /// PEM certificates, leaf first, followed by the chain up to the root
    pub certificates: Vec<String>,
    /// Serial number as reported by the CA
    pub serial_number: Option<String>,
    /// SHA-1 thumbprint as reported by the CA
    pub thumbprint: Option<String>,
    /// CA-side certificate id
    pub certificate_id: Option<u64>,
    /// CA-side request id
    pub request_id: Option<u64>,
}
