//! cert-manager CertificateRequest
//!
//! Owned by [cert-manager](https://cert-manager.io/); see
//! <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificateRequest>.
//! Only the fields this controller reads or writes are modelled.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::condition::{
    find_condition, is_condition_true, reasons, Condition, CONDITION_APPROVED, CONDITION_DENIED,
    CONDITION_READY,
};
use crate::error::CrdError;

/// A request for a signed certificate, carrying a PEM CSR.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "CertificateRequest",
    namespaced,
    status = "CertificateRequestStatus",
    shortname = "cr"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// Base64 encoded PEM certificate signing request
    pub request: String,

    /// Requested validity, Go duration syntax (e.g. `2160h0m0s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Issuer that should sign this request
    pub issuer_ref: ObjectReference,

    /// Requested key usages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,

    /// Whether a CA certificate is requested
    #[serde(default, rename = "isCA")]
    pub is_ca: bool,

    /// Name of the user that created the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Reference to an issuer resource.
///
/// See <https://cert-manager.io/docs/reference/api-docs/#meta.cert-manager.io/v1.ObjectReference>.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// Name of the issuer
    pub name: String,

    /// Kind of the issuer, defaults to `Issuer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// API group of the issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Observed state of a CertificateRequest.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    /// Ready plus the externally managed Approved/Denied conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Base64 encoded PEM chain (leaf first)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// Base64 encoded PEM CA certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,

    /// When the request became terminally failed or denied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_time: Option<DateTime<Utc>>,
}

impl CertificateRequestStatus {
    /// The `Ready` condition, if any.
    pub fn ready_condition(&self) -> Option<&Condition> {
        find_condition(&self.conditions, CONDITION_READY)
    }

    /// Reason of the `Ready` condition, if any.
    pub fn ready_reason(&self) -> Option<&str> {
        self.ready_condition().and_then(|c| c.reason.as_deref())
    }

    /// An approver set `Approved=True`.
    pub fn is_approved(&self) -> bool {
        is_condition_true(&self.conditions, CONDITION_APPROVED)
    }

    /// An approver set `Denied=True`.
    pub fn is_denied(&self) -> bool {
        is_condition_true(&self.conditions, CONDITION_DENIED)
    }

    /// No further automatic action happens once a request is issued, denied or failed.
    pub fn is_terminal(&self) -> bool {
        if self.certificate.is_some() {
            return true;
        }
        matches!(
            self.ready_reason(),
            Some(reasons::ISSUED) | Some(reasons::DENIED) | Some(reasons::FAILED)
        )
    }
}

impl CertificateRequestSpec {
    /// Requested certificate lifetime, if any.
    pub fn requested_duration(&self) -> Result<Option<Duration>, CrdError> {
        self.duration.as_deref().map(parse_go_duration).transpose()
    }
}

/// Parses a Go `time.Duration` string such as `2160h0m0s`, `90m` or `1.5h`.
pub fn parse_go_duration(input: &str) -> Result<Duration, CrdError> {
    let invalid = || CrdError::InvalidDuration(input.to_string());
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total += value * seconds_per_unit;
    }

    if !total.is_finite() {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}
