//! Bootstrap data lookup for machines.

use crate::error::ControllerError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use crds::Machine;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::debug;

/// Key of the bootstrap payload inside the secret
pub const BOOTSTRAP_DATA_KEY: &str = "value";

/// Source of the cloud-init payload for a machine.
#[async_trait::async_trait]
pub trait BootstrapDataProvider: Send + Sync {
    /// Base64 payload for `owner`, or `None` while the bootstrap provider
    /// has not produced it yet.
    async fn bootstrap_data(&self, namespace: &str, owner: &Machine) -> Result<Option<String>, ControllerError>;
}

/// Reads the payload from the secret named by `spec.bootstrap.dataSecretName`
pub struct SecretBootstrapData {
    client: Client,
}

impl SecretBootstrapData {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl BootstrapDataProvider for SecretBootstrapData {
    async fn bootstrap_data(&self, namespace: &str, owner: &Machine) -> Result<Option<String>, ControllerError> {
        let Some(secret_name) = owner.spec.bootstrap.data_secret_name.as_deref() else {
            return Ok(None);
        };

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = secrets.get_opt(secret_name).await? else {
            debug!("Bootstrap secret {}/{} not found yet", namespace, secret_name);
            return Ok(None);
        };

        let value = secret
            .data
            .as_ref()
            .and_then(|d| d.get(BOOTSTRAP_DATA_KEY))
            .ok_or_else(|| {
                ControllerError::Validation(format!(
                    "bootstrap secret {}/{} has no {:?} key",
                    namespace, secret_name, BOOTSTRAP_DATA_KEY
                ))
            })?;
        Ok(Some(STANDARD.encode(&value.0)))
    }
}
