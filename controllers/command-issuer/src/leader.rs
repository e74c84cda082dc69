//! Leader election on a coordination.k8s.io Lease.
//!
//! Only the holder of the Lease runs controllers. The holder renews every
//! [`RETRY_PERIOD`]. It steps down as soon as a renewal finds another holder,
//! or when it cannot renew within [`RENEW_DEADLINE`], which is before another
//! replica may take over at [`LEASE_DURATION`].

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::PostParams;
use kube::{Api, Client, Error as KubeError, ResourceExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::ControllerError;

/// How long a Lease stays valid without renewal.
pub const LEASE_DURATION: Duration = Duration::from_secs(15);

/// The holder steps down when it has not renewed for this long.
pub const RENEW_DEADLINE: Duration = Duration::from_secs(10);

/// Interval between acquire and renew attempts.
pub const RETRY_PERIOD: Duration = Duration::from_secs(2);

/// The parts of a Lease spec the election reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    /// Current holder identity
    pub holder: Option<String>,
    /// When the current holder acquired the Lease
    pub acquired: Option<DateTime<Utc>>,
    /// Last renewal by the holder
    pub renewed: Option<DateTime<Utc>>,
    /// Validity after each renewal
    pub duration: Duration,
    /// Number of holder changes
    pub transitions: i32,
}

impl Default for LeaseRecord {
    fn default() -> Self {
        Self {
            holder: None,
            acquired: None,
            renewed: None,
            duration: LEASE_DURATION,
            transitions: 0,
        }
    }
}

fn spec_str<'a>(spec: &'a Value, key: &str) -> Option<&'a str> {
    spec.get(key).and_then(Value::as_str)
}

fn spec_time(spec: &Value, key: &str) -> Option<DateTime<Utc>> {
    spec_str(spec, key)
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|time| time.with_timezone(&Utc))
}

fn micro_time(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true))
}

impl LeaseRecord {
    /// Reads the record from a Lease object.
    pub fn from_lease(lease: &Lease) -> Result<Self, ControllerError> {
        let spec = serde_json::to_value(&lease.spec)?;
        Ok(Self {
            holder: spec_str(&spec, "holderIdentity").map(str::to_string),
            acquired: spec_time(&spec, "acquireTime"),
            renewed: spec_time(&spec, "renewTime"),
            duration: spec
                .get("leaseDurationSeconds")
                .and_then(Value::as_u64)
                .map_or(LEASE_DURATION, Duration::from_secs),
            transitions: spec
                .get("leaseTransitions")
                .and_then(Value::as_i64)
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(0),
        })
    }

    /// Lease object carrying this record, pinned to `resource_version` when given.
    pub fn to_lease(&self, name: &str, namespace: &str, resource_version: Option<String>) -> Result<Lease, ControllerError> {
        let mut metadata = json!({ "name": name, "namespace": namespace });
        if let Some(rv) = resource_version {
            metadata["resourceVersion"] = json!(rv);
        }
        Ok(serde_json::from_value(json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": metadata,
            "spec": {
                "holderIdentity": self.holder,
                "leaseDurationSeconds": self.duration.as_secs(),
                "acquireTime": micro_time(self.acquired),
                "renewTime": micro_time(self.renewed),
                "leaseTransitions": self.transitions,
            },
        }))?)
    }

    /// When the Lease lapses without another renewal.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let duration = chrono::Duration::from_std(self.duration).unwrap_or(chrono::Duration::zero());
        self.renewed.map(|renewed| renewed + duration)
    }
}

/// What a candidate should do with the Lease it just read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDecision {
    /// No Lease exists yet
    Create,
    /// We hold it
    Renew,
    /// Unheld or expired
    TakeOver,
    /// Someone else holds a live Lease
    Wait,
}

/// Decides the next step for `identity` given the current Lease.
pub fn lease_decision(current: Option<&LeaseRecord>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let Some(record) = current else {
        return LeaseDecision::Create;
    };
    match record.holder.as_deref().filter(|holder| !holder.is_empty()) {
        Some(holder) if holder == identity => LeaseDecision::Renew,
        None => LeaseDecision::TakeOver,
        Some(_) => match record.expires_at() {
            Some(expires) if expires > now => LeaseDecision::Wait,
            _ => LeaseDecision::TakeOver,
        },
    }
}

/// Record to write for `decision`, `None` when the candidate must wait.
pub fn next_record(
    decision: LeaseDecision,
    current: Option<&LeaseRecord>,
    identity: &str,
    now: DateTime<Utc>,
) -> Option<LeaseRecord> {
    let fresh = |transitions| LeaseRecord {
        holder: Some(identity.to_string()),
        acquired: Some(now),
        renewed: Some(now),
        duration: LEASE_DURATION,
        transitions,
    };
    match decision {
        LeaseDecision::Wait => None,
        LeaseDecision::Create => Some(fresh(0)),
        LeaseDecision::TakeOver => Some(fresh(current.map_or(0, |r| r.transitions.saturating_add(1)))),
        LeaseDecision::Renew => Some(LeaseRecord {
            renewed: Some(now),
            duration: LEASE_DURATION,
            ..current.cloned().unwrap_or_else(|| fresh(0))
        }),
    }
}

/// Unique identity for this replica.
pub fn candidate_identity() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "command-issuer".to_string());
    format!("{host}_{}", uuid::Uuid::new_v4())
}

/// Competes for and holds the election Lease.
pub struct LeaderElector {
    api: Api<Lease>,
    name: String,
    namespace: String,
    identity: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    /// Candidate for Lease `namespace/name`.
    pub fn new(client: Client, namespace: &str, name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            namespace: namespace.to_string(),
            identity: candidate_identity(),
            clock,
        }
    }

    /// This candidate's holder identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// One compare-and-swap round. `Ok(true)` means we hold the Lease now.
    async fn try_acquire_or_renew(&self) -> Result<bool, ControllerError> {
        let existing = self.api.get_opt(&self.name).await?;
        let current = existing.as_ref().map(LeaseRecord::from_lease).transpose()?;
        let now = self.clock.now();
        let decision = lease_decision(current.as_ref(), &self.identity, now);
        let Some(next) = next_record(decision, current.as_ref(), &self.identity, now) else {
            debug!(lease = %self.name, holder = ?current.and_then(|r| r.holder), "Lease held by another replica");
            return Ok(false);
        };

        let resource_version = existing.as_ref().and_then(ResourceExt::resource_version);
        let lease = next.to_lease(&self.name, &self.namespace, resource_version)?;
        let params = PostParams::default();
        let written = match existing {
            None => self.api.create(&params, &lease).await.map(|_| ()),
            Some(_) => self.api.replace(&self.name, &params, &lease).await.map(|_| ()),
        };
        match written {
            Ok(()) => {
                if decision == LeaseDecision::TakeOver || decision == LeaseDecision::Create {
                    info!(lease = %self.name, identity = %self.identity, transitions = next.transitions, "Acquired leader Lease");
                }
                Ok(true)
            }
            Err(KubeError::Api(ref response)) if response.code == 409 => {
                debug!(lease = %self.name, "Lost Lease write race");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Blocks until this replica holds the Lease.
    pub async fn acquire(&self) {
        info!(lease = %self.name, namespace = %self.namespace, identity = %self.identity, "Waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => warn!(lease = %self.name, error = %e, "Leader election attempt failed"),
            }
            tokio::time::sleep(RETRY_PERIOD).await;
        }
    }

    /// Keeps renewing in the background.
    ///
    /// The receiver flips to `false` as soon as another replica holds the
    /// Lease, or once renewal has failed for longer than [`RENEW_DEADLINE`];
    /// the task ends at that point.
    pub fn spawn_renewal(self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(true);
        tokio::spawn(async move {
            let mut last_renewed = Instant::now();
            loop {
                tokio::time::sleep(RETRY_PERIOD).await;
                let outcome = self.try_acquire_or_renew().await;
                match &outcome {
                    Ok(true) => last_renewed = Instant::now(),
                    Ok(false) => {}
                    Err(e) => warn!(lease = %self.name, error = %e, "Lease renewal failed"),
                }
                if let Some(lost) = step_down_reason(&outcome, last_renewed.elapsed()) {
                    error!(lease = %self.name, identity = %self.identity, error = %lost, "Leadership lost");
                    let _ = tx.send(false);
                    return;
                }
            }
        });
        rx
    }
}

/// Why the holder must stop running controllers after a renewal round, if it must.
///
/// A rejected renewal means another replica owns the Lease now, so the term
/// ends at once. Failed calls are tolerated until [`RENEW_DEADLINE`].
pub fn step_down_reason(outcome: &Result<bool, ControllerError>, since_renewed: Duration) -> Option<ControllerError> {
    match outcome {
        Ok(true) => None,
        Ok(false) => Some(ControllerError::LeaderElection(
            "Lease is held by another replica".to_string(),
        )),
        Err(e) if since_renewed > RENEW_DEADLINE => Some(ControllerError::LeaderElection(format!(
            "Lease not renewed for {}s: {e}",
            since_renewed.as_secs()
        ))),
        Err(_) => None,
    }
}

/// Resolves once `leader` reports the loss of leadership.
pub async fn leadership_lost(mut leader: watch::Receiver<bool>) -> ControllerError {
    loop {
        if !*leader.borrow_and_update() {
            break;
        }
        if leader.changed().await.is_err() {
            break;
        }
    }
    ControllerError::LeaderElection("leadership lost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(i64::from(secs))
    }

    fn held_by(holder: &str, renewed: DateTime<Utc>) -> LeaseRecord {
        LeaseRecord {
            holder: Some(holder.to_string()),
            acquired: Some(renewed),
            renewed: Some(renewed),
            duration: LEASE_DURATION,
            transitions: 3,
        }
    }

    #[test]
    fn test_missing_lease_is_created() {
        assert_eq!(lease_decision(None, "me", at(0)), LeaseDecision::Create);
        let next = next_record(LeaseDecision::Create, None, "me", at(0)).unwrap();
        assert_eq!(next.holder.as_deref(), Some("me"));
        assert_eq!(next.transitions, 0);
    }

    #[test]
    fn test_own_lease_is_renewed() {
        let current = held_by("me", at(0));
        assert_eq!(lease_decision(Some(&current), "me", at(5)), LeaseDecision::Renew);
        let next = next_record(LeaseDecision::Renew, Some(&current), "me", at(5)).unwrap();
        assert_eq!(next.renewed, Some(at(5)));
        assert_eq!(next.acquired, Some(at(0)));
        assert_eq!(next.transitions, 3);
    }

    #[test]
    fn test_live_foreign_lease_is_respected() {
        let current = held_by("other", at(0));
        assert_eq!(lease_decision(Some(&current), "me", at(14)), LeaseDecision::Wait);
        assert!(next_record(LeaseDecision::Wait, Some(&current), "me", at(14)).is_none());
    }

    #[test]
    fn test_expired_or_released_lease_is_taken_over() {
        let current = held_by("other", at(0));
        assert_eq!(lease_decision(Some(&current), "me", at(16)), LeaseDecision::TakeOver);
        let next = next_record(LeaseDecision::TakeOver, Some(&current), "me", at(16)).unwrap();
        assert_eq!(next.holder.as_deref(), Some("me"));
        assert_eq!(next.transitions, 4);

        let released = LeaseRecord {
            holder: Some(String::new()),
            ..held_by("other", at(0))
        };
        assert_eq!(lease_decision(Some(&released), "me", at(1)), LeaseDecision::TakeOver);
    }

    #[test]
    fn test_lease_object_round_trip() {
        let record = held_by("pod-a_1234", at(7));
        let lease = record.to_lease("b68cef20.keyfactor.com", "cert-manager", Some("42".to_string())).unwrap();
        assert_eq!(lease.resource_version().as_deref(), Some("42"));
        assert_eq!(lease.namespace().as_deref(), Some("cert-manager"));
        assert_eq!(LeaseRecord::from_lease(&lease).unwrap(), record);
    }

    #[test]
    fn test_candidate_identities_are_unique() {
        assert_ne!(candidate_identity(), candidate_identity());
    }

    #[tokio::test]
    async fn test_leadership_lost_resolves_on_false() {
        let (tx, rx) = watch::channel(true);
        let waiter = tokio::spawn(leadership_lost(rx));
        tx.send(false).unwrap();
        let lost = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(lost, ControllerError::LeaderElection(_)));
    }

    #[test]
    fn test_rejected_renewal_steps_down_immediately() {
        let lost = step_down_reason(&Ok(false), Duration::from_secs(2));
        assert!(matches!(lost, Some(ControllerError::LeaderElection(_))));
    }

    #[test]
    fn test_failed_renewal_tolerated_until_deadline() {
        let failed = || Err(ControllerError::Watch("connection reset".to_string()));
        assert!(step_down_reason(&failed(), Duration::from_secs(4)).is_none());
        assert!(step_down_reason(&Ok(true), Duration::from_secs(60)).is_none());
        let lost = step_down_reason(&failed(), RENEW_DEADLINE + Duration::from_secs(1));
        assert!(matches!(lost, Some(ControllerError::LeaderElection(_))));
    }
}
