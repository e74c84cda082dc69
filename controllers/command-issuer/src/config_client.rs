//! Secret lookups for issuer credentials

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ControllerError;

/// Decoded secret data, `data` merged with `stringData`.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Resolves secrets referenced by issuers.
#[async_trait]
pub trait ConfigClient: Send + Sync {
    /// Reads a secret; `Ok(None)` when it does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, ControllerError>;
}

/// [`ConfigClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeConfigClient {
    client: Client,
}

impl std::fmt::Debug for KubeConfigClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeConfigClient").finish_non_exhaustive()
    }
}

impl KubeConfigClient {
    /// Client reading secrets with the controller's own service account.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigClient for KubeConfigClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, ControllerError> {
        debug!(namespace = %namespace, name = %name, "Fetching secret");
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(secret_data))
    }
}

/// Flattens a Secret into its key/value bytes.
pub fn secret_data(secret: Secret) -> SecretData {
    let mut data: SecretData = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect();
    for (k, v) in secret.string_data.unwrap_or_default() {
        data.insert(k, v.into_bytes());
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_secret_data_merges_string_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("username".to_string(), ByteString(b"svc".to_vec())),
                ("password".to_string(), ByteString(b"old".to_vec())),
            ])),
            string_data: Some(BTreeMap::from([("password".to_string(), "new".to_string())])),
            ..Default::default()
        };
        let data = secret_data(secret);
        assert_eq!(data["username"], b"svc".to_vec());
        assert_eq!(data["password"], b"new".to_vec());
    }
}
