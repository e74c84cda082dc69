//! Controller-specific error types.
//!
//! Errors from the reconcilers and the process bootstrap that are not
//! covered by upstream library errors.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the command-issuer controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// A status write lost an optimistic-concurrency race
    #[error("Conflict writing status of {0}")]
    Conflict(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Leadership was lost
    #[error("Leader election failed: {0}")]
    LeaderElection(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Maps a write error, turning HTTP 409 into [`ControllerError::Conflict`].
    pub fn from_write(error: KubeError, what: impl Into<String>) -> Self {
        match error {
            KubeError::Api(ref response) if response.code == 409 => ControllerError::Conflict(what.into()),
            other => ControllerError::Kube(other),
        }
    }
}

/// Problems with an issuer's referenced secrets or their contents.
///
/// These are surfaced on the `Ready` condition and wait for a change of the
/// issuer or secret rather than being retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Referenced secret does not exist
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound {
        /// Namespace searched
        namespace: String,
        /// Secret name
        name: String,
    },

    /// Secret lives outside the namespace this issuer may read from
    #[error(
        "secret namespace {requested:?} is not allowed, secrets must be in {allowed:?} unless access is granted at cluster level"
    )]
    NamespaceNotAllowed {
        /// Namespace named in the issuer spec
        requested: String,
        /// Namespace the issuer is confined to
        allowed: String,
    },

    /// Issuer spec is unusable
    #[error("invalid issuer spec: {0}")]
    InvalidSpec(String),
}

impl ConfigError {
    /// Missing secrets resolve themselves once created; everything else needs an edit.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::SecretNotFound { .. })
    }
}
