//! Typed status conditions
//!
//! Follows the Kubernetes condition convention: one entry per `type`, a
//! True/False/Unknown status, a machine-readable reason and a human message.
//! `lastTransitionTime` only moves when `status` changes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type published by this controller on every resource it owns status for.
pub const CONDITION_READY: &str = "Ready";

/// Condition type set by an external approver on a CertificateRequest.
pub const CONDITION_APPROVED: &str = "Approved";

/// Condition type set by an external approver when a CertificateRequest is denied.
pub const CONDITION_DENIED: &str = "Denied";

/// Reasons written on the `Ready` condition.
pub mod reasons {
    /// Issuer configuration was verified against the CA
    pub const VERIFIED: &str = "Verified";
    /// A referenced secret does not exist
    pub const SECRET_NOT_FOUND: &str = "SecretNotFound";
    /// Issuer spec or secret contents are unusable
    pub const CONFIG_ERROR: &str = "ConfigError";
    /// The CA could not be reached or refused the credentials
    pub const HEALTH_CHECK_FAILED: &str = "HealthCheckFailed";

    /// Request is waiting on approval, the issuer, or a retry
    pub const PENDING: &str = "Pending";
    /// The referenced issuer is missing or not Ready
    pub const ISSUER_NOT_READY: &str = "IssuerNotReady";
    /// Certificate was written to the request status
    pub const ISSUED: &str = "Issued";
    /// An approver denied the request
    pub const DENIED: &str = "Denied";
    /// The CA rejected the request or retries were exhausted
    pub const FAILED: &str = "Failed";
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

/// A single status condition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Ready`
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Machine-readable reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Resource generation this condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time `status` changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Returns the condition of the given type, if present.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True when the condition of the given type exists with status `True`.
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Replaces (or appends) the condition of `type_`.
///
/// The existing `lastTransitionTime` is kept unless `status` changed, and any
/// duplicate entries of the same type are dropped so the list never holds
/// more than one condition per type. Returns `true` when anything changed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) -> bool {
    let message = message.into();
    let previous = find_condition(conditions, type_).cloned();

    let last_transition_time = match &previous {
        Some(existing) if existing.status == status => existing.last_transition_time.or(Some(now)),
        _ => Some(now),
    };

    let updated = Condition {
        type_: type_.to_string(),
        status,
        reason: Some(reason.to_string()),
        message: Some(message),
        observed_generation,
        last_transition_time,
    };

    let duplicates = conditions.iter().filter(|c| c.type_ == type_).count();
    if duplicates == 1 && previous.as_ref() == Some(&updated) {
        return false;
    }

    match conditions.iter().position(|c| c.type_ == type_) {
        Some(index) => {
            conditions[index] = updated;
            let mut seen = false;
            conditions.retain(|c| {
                if c.type_ != type_ {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
        }
        None => conditions.push(updated),
    }
    true
}
