//! CA client errors

use thiserror::Error;

/// Errors that can occur when talking to the CA API
#[derive(Debug, Error)]
pub enum CommandError {
    /// HTTP transport error (connect, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// CA API answered with a non-success status
    #[error("CA API error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or summary
        message: String,
    },

    /// Credentials were rejected or no token could be obtained
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CA accepted the enrollment but its answer could not be read
    #[error("Enrollment answered but unreadable: {0}")]
    UnreadableEnrollment(String),

    /// Request was malformed before it was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// CA answered the enrollment without issuing a certificate
    #[error("Enrollment not issued ({disposition}): {message}")]
    Disposition {
        /// Disposition reported by the CA, e.g. `DENIED` or `EXTERNAL VALIDATION`
        disposition: String,
        /// Disposition message
        message: String,
    },

    /// Client could not be configured (bad URL, bad CA bundle)
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CommandError {
    /// True when retrying the same call later may succeed.
    ///
    /// Anything the CA answered deliberately (4xx other than 408/429, a
    /// non-issued disposition, an unreadable 2xx enrollment) is not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            CommandError::Http(_) | CommandError::Serialization(_) => true,
            CommandError::Authentication(_) => true,
            CommandError::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            CommandError::InvalidRequest(_)
            | CommandError::UnreadableEnrollment(_)
            | CommandError::Disposition { .. }
            | CommandError::Configuration(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> CommandError {
        CommandError::Api {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(api(500).is_transient());
        assert!(api(503).is_transient());
        assert!(api(429).is_transient());
        assert!(api(408).is_transient());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert!(!api(400).is_transient());
        assert!(!api(404).is_transient());
        assert!(
            !CommandError::Disposition {
                disposition: "DENIED".to_string(),
                message: "template not allowed".to_string(),
            }
            .is_transient()
        );
        assert!(!CommandError::InvalidRequest("empty CSR".to_string()).is_transient());
        assert!(!CommandError::UnreadableEnrollment("expected value".to_string()).is_transient());
    }

    #[test]
    fn test_authentication_is_transient() {
        assert!(CommandError::Authentication("token endpoint 503".to_string()).is_transient());
    }
}
