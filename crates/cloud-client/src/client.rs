//! Cloud agent HTTP client
//!
//! Resources live under `/api/v1/groups/{group}`; every other kind is nested
//! as `/api/v1/groups/{group}/{kind}/{name}`. Reconcile is a `PUT` of the
//! full spec, which the agent applies as create-or-update.

use crate::auth::Authorizer;
use crate::cloud_trait::CloudClientTrait;
use crate::error::CloudError;
use crate::models::*;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const API_PREFIX: &str = "/api/v1";

/// Cloud agent API client
pub struct CloudClient {
    client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl CloudClient {
    /// Create a new client with an already acquired token
    ///
    /// # Arguments
    /// * `base_url` - Agent base URL (e.g., "http://cloud-agent.fleet-system:8080")
    /// * `token` - Bearer token
    pub fn new(base_url: String, token: String) -> Result<Self, CloudError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Acquire a token from `authorizer` and create a client.
    ///
    /// Fails when no token can be obtained; callers treat that as fatal.
    pub async fn connect(base_url: String, authorizer: &dyn Authorizer) -> Result<Self, CloudError> {
        let token = authorizer.authorize().await?;
        Self::new(base_url, token)
    }

    fn group_url(&self, group: &str) -> String {
        format!("{}{}/groups/{}", self.base_url, API_PREFIX, urlencoding::encode(group))
    }

    fn resource_url(&self, group: &str, kind: &str, name: &str) -> String {
        format!("{}/{}/{}", self.group_url(group), kind, urlencoding::encode(name))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, CloudError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let response = check(response, url).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn put<B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<(), CloudError> {
        debug!("PUT {}", url);
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;
        check(response, url).await?;
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<(), CloudError> {
        debug!("DELETE {}", url);
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        check(response, url).await?;
        Ok(())
    }
}

/// Map non-success responses to [`CloudError`].
async fn check(response: Response, url: &str) -> Result<Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(CloudError::NotFound(url.to_string())),
        StatusCode::CONFLICT => Err(CloudError::AlreadyExists(url.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(CloudError::Authentication(format!("{} - {}", status, body)))
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            match serde_json::from_str::<ErrorBody>(&body) {
                Ok(err) => Err(CloudError::Api { code: err.code, message: err.message }),
                Err(_) => Err(CloudError::InvalidRequest(format!("{} - {}", status, body))),
            }
        }
        _ => match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => Err(CloudError::Api { code: err.code, message: err.message }),
            Err(_) => Err(CloudError::Api {
                code: status.as_u16().to_string(),
                message: body.chars().take(500).collect(),
            }),
        },
    }
}

#[async_trait::async_trait]
impl CloudClientTrait for CloudClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_connection(&self) -> Result<(), CloudError> {
        let url = format!("{}{}/status", self.base_url, API_PREFIX);
        debug!("Validating cloud agent connectivity");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        check(response, &url).await?;
        debug!("Cloud agent reachable");
        Ok(())
    }

    async fn get_group(&self, name: &str) -> Result<Group, CloudError> {
        self.get(&self.group_url(name)).await
    }

    async fn reconcile_group(&self, spec: &GroupSpec) -> Result<(), CloudError> {
        self.put(&self.group_url(&spec.name), spec).await
    }

    async fn delete_group(&self, name: &str) -> Result<(), CloudError> {
        self.delete(&self.group_url(name)).await
    }

    async fn get_virtual_network(&self, resource_group: &str, name: &str) -> Result<VirtualNetwork, CloudError> {
        self.get(&self.resource_url(resource_group, "virtualNetworks", name)).await
    }

    async fn reconcile_virtual_network(&self, spec: &VirtualNetworkSpec) -> Result<(), CloudError> {
        self.put(&self.resource_url(&spec.resource_group, "virtualNetworks", &spec.name), spec)
            .await
    }

    async fn delete_virtual_network(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.delete(&self.resource_url(resource_group, "virtualNetworks", name)).await
    }

    async fn get_key_vault(&self, resource_group: &str, name: &str) -> Result<KeyVault, CloudError> {
        self.get(&self.resource_url(resource_group, "keyVaults", name)).await
    }

    async fn reconcile_key_vault(&self, spec: &KeyVaultSpec) -> Result<(), CloudError> {
        self.put(&self.resource_url(&spec.resource_group, "keyVaults", &spec.name), spec)
            .await
    }

    async fn delete_key_vault(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.delete(&self.resource_url(resource_group, "keyVaults", name)).await
    }

    async fn get_availability_set(&self, resource_group: &str, name: &str) -> Result<AvailabilitySet, CloudError> {
        self.get(&self.resource_url(resource_group, "availabilitySets", name)).await
    }

    async fn reconcile_availability_set(&self, spec: &AvailabilitySetSpec) -> Result<(), CloudError> {
        self.put(&self.resource_url(&spec.resource_group, "availabilitySets", &spec.name), spec)
            .await
    }

    async fn delete_availability_set(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.delete(&self.resource_url(resource_group, "availabilitySets", name)).await
    }

    async fn get_network_interface(&self, resource_group: &str, name: &str) -> Result<NetworkInterface, CloudError> {
        self.get(&self.resource_url(resource_group, "networkInterfaces", name)).await
    }

    async fn reconcile_network_interface(&self, spec: &NetworkInterfaceSpec) -> Result<(), CloudError> {
        self.put(&self.resource_url(&spec.resource_group, "networkInterfaces", &spec.name), spec)
            .await
    }

    async fn delete_network_interface(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.delete(&self.resource_url(resource_group, "networkInterfaces", name)).await
    }

    async fn get_disk(&self, resource_group: &str, name: &str) -> Result<Disk, CloudError> {
        self.get(&self.resource_url(resource_group, "disks", name)).await
    }

    async fn reconcile_disk(&self, spec: &DiskSpec) -> Result<(), CloudError> {
        self.put(&self.resource_url(&spec.resource_group, "disks", &spec.name), spec)
            .await
    }

    async fn delete_disk(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.delete(&self.resource_url(resource_group, "disks", name)).await
    }

    async fn get_virtual_machine(&self, resource_group: &str, name: &str) -> Result<VirtualMachine, CloudError> {
        self.get(&self.resource_url(resource_group, "virtualMachines", name)).await
    }

    async fn reconcile_virtual_machine(&self, spec: &VirtualMachineSpec) -> Result<(), CloudError> {
        self.put(&self.resource_url(&spec.resource_group, "virtualMachines", &spec.name), spec)
            .await
    }

    async fn delete_virtual_machine(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.delete(&self.resource_url(resource_group, "virtualMachines", name)).await
    }

    async fn get_load_balancer(&self, resource_group: &str, name: &str) -> Result<LoadBalancer, CloudError> {
        self.get(&self.resource_url(resource_group, "loadBalancers", name)).await
    }

    async fn reconcile_load_balancer(&self, spec: &LoadBalancerSpec) -> Result<(), CloudError> {
        self.put(&self.resource_url(&spec.resource_group, "loadBalancers", &spec.name), spec)
            .await
    }

    async fn delete_load_balancer(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.delete(&self.resource_url(resource_group, "loadBalancers", name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_urls() {
        let client = CloudClient::new("http://agent:8080/".into(), "t".into()).unwrap();
        assert_eq!(client.base_url(), "http://agent:8080");
        assert_eq!(client.group_url("rg-1"), "http://agent:8080/api/v1/groups/rg-1");
        assert_eq!(
            client.resource_url("rg-1", "virtualMachines", "vm a"),
            "http://agent:8080/api/v1/groups/rg-1/virtualMachines/vm%20a"
        );
    }
}
