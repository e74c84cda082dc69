//! In-cluster namespace discovery
//!
//! When `--cluster-resource-namespace` is not given, the controller uses the
//! namespace of its own service account.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Namespace file mounted into every pod with a service account token.
pub const SERVICE_ACCOUNT_NAMESPACE_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Why the namespace could not be discovered.
#[derive(Debug, Error)]
pub enum NamespaceError {
    /// No service account namespace file, so not running in a pod
    #[error("not running in-cluster, please supply --cluster-resource-namespace")]
    NotInCluster,

    /// The file exists but could not be read
    #[error("unexpected error while reading in-cluster namespace: {0}")]
    Read(#[from] io::Error),

    /// The file is empty
    #[error("in-cluster namespace file is empty")]
    Empty,
}

/// Reads the namespace of the pod's service account.
pub fn in_cluster_namespace() -> Result<String, NamespaceError> {
    namespace_from_file(Path::new(SERVICE_ACCOUNT_NAMESPACE_PATH))
}

/// Reads a namespace from `path`, distinguishing a missing file from a broken one.
pub fn namespace_from_file(path: &Path) -> Result<String, NamespaceError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(NamespaceError::NotInCluster),
        Err(e) => return Err(NamespaceError::Read(e)),
    };
    let namespace = contents.trim();
    if namespace.is_empty() {
        return Err(NamespaceError::Empty);
    }
    Ok(namespace.to_string())
}

/// The flag wins; otherwise the in-cluster namespace.
pub fn resolve_cluster_resource_namespace(flag: Option<&str>) -> Result<String, NamespaceError> {
    match flag.map(str::trim).filter(|ns| !ns.is_empty()) {
        Some(ns) => Ok(ns.to_string()),
        None => in_cluster_namespace(),
    }
}
