//! command-issuer CRD Definitions
//!
//! Kubernetes resource definitions used by the command-issuer controller:
//! - `Issuer` / `ClusterIssuer`: CA connection parameters owned by this controller
//! - `CertificateRequest`: cert-manager's request resource, read and status-patched only
//! - `Condition`: the typed status condition shared by all of the above

pub mod certificate_request;
pub mod condition;
pub mod error;
pub mod issuer;
pub mod scheme;

pub use certificate_request::*;
pub use condition::*;
pub use error::CrdError;
pub use issuer::*;
pub use scheme::Scheme;
