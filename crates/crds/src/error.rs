//! CRD helper errors

use thiserror::Error;

/// Errors raised while interpreting resource contents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrdError {
    /// A duration string could not be parsed
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    /// The same kind was registered twice in a scheme
    #[error("kind {0} is already registered")]
    DuplicateKind(String),
}
