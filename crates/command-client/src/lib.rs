//! External CA REST API Client
//!
//! A Rust client for the certificate enrollment API of the external CA
//! (Keyfactor Command style REST surface). Covers what an issuer needs:
//! a lightweight authenticated health probe and PEM CSR enrollment.
//!
//! # Example
//!
//! ```no_run
//! use command_client::{CommandClient, CommandClientConfig, Credentials, EnrollmentRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CommandClient::new(CommandClientConfig::new(
//!     "ca.example.com",
//!     "KeyfactorAPI",
//!     Credentials::Basic {
//!         username: "DOMAIN\\svc-issuer".to_string(),
//!         password: "secret".to_string(),
//!     },
//! ))?;
//!
//! client.check_connection().await?;
//!
//! let issued = client
//!     .enroll_csr(EnrollmentRequest {
//!         csr_pem: "-----BEGIN CERTIFICATE REQUEST-----...".to_string(),
//!         template: "WebServer".to_string(),
//!         certificate_authority: "ca-host\\Issuing-CA".to_string(),
//!         metadata: Default::default(),
//!     })
//!     .await?;
//! println!("issued {} certificates", issued.certificates.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Error classification
//!
//! [`CommandError::is_transient`] separates failures worth retrying
//! (network, 5xx, throttling, token endpoint trouble) from answers the CA
//! gave deliberately (4xx, non-issued dispositions).

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod pem;
#[path = "trait.rs"]
pub mod command_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use auth::Credentials;
pub use client::{CommandClient, CommandClientConfig};
pub use command_trait::CommandClientTrait;
pub use error::CommandError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::MockCommandClient;
