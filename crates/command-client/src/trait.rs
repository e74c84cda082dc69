//! CommandClient trait for mocking
//!
//! The concrete [`CommandClient`](crate::CommandClient) implements this
//! trait; signer code is generic over it so tests can swap in
//! `MockCommandClient`.

use crate::error::CommandError;
use crate::models::{EnrollmentRequest, IssuedCertificate};

/// Trait for CA API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait CommandClientTrait: Send + Sync {
    /// Base URL of the API
    fn base_url(&self) -> &str;

    /// Authenticated connectivity probe
    async fn check_connection(&self) -> Result<(), CommandError>;

    /// Enroll a PEM CSR
    async fn enroll_csr(&self, request: EnrollmentRequest) -> Result<IssuedCertificate, CommandError>;
}
