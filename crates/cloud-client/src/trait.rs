//! CloudClient trait for mocking
//!
//! The concrete [`CloudClient`](crate::CloudClient) implements this trait and
//! tests use [`MockCloudClient`](crate::MockCloudClient) behind the
//! `test-util` feature.

use crate::error::CloudError;
use crate::models::*;

/// Typed operations against the cloud agent, one set per resource kind.
///
/// `reconcile_*` is an idempotent create-or-update. `get_*` returns
/// [`CloudError::NotFound`] when the resource is absent.
#[async_trait::async_trait]
pub trait CloudClientTrait: Send + Sync {
    /// Base URL of the agent
    fn base_url(&self) -> &str;

    /// Check connectivity and credentials
    async fn validate_connection(&self) -> Result<(), CloudError>;

    // Resource groups
    async fn get_group(&self, name: &str) -> Result<Group, CloudError>;
    async fn reconcile_group(&self, spec: &GroupSpec) -> Result<(), CloudError>;
    async fn delete_group(&self, name: &str) -> Result<(), CloudError>;

    // Virtual networks
    async fn get_virtual_network(&self, resource_group: &str, name: &str) -> Result<VirtualNetwork, CloudError>;
    async fn reconcile_virtual_network(&self, spec: &VirtualNetworkSpec) -> Result<(), CloudError>;
    async fn delete_virtual_network(&self, resource_group: &str, name: &str) -> Result<(), CloudError>;

    // Key vaults
    async fn get_key_vault(&self, resource_group: &str, name: &str) -> Result<KeyVault, CloudError>;
    async fn reconcile_key_vault(&self, spec: &KeyVaultSpec) -> Result<(), CloudError>;
    async fn delete_key_vault(&self, resource_group: &str, name: &str) -> Result<(), CloudError>;

    // Availability sets
    async fn get_availability_set(&self, resource_group: &str, name: &str) -> Result<AvailabilitySet, CloudError>;
    async fn reconcile_availability_set(&self, spec: &AvailabilitySetSpec) -> Result<(), CloudError>;
    async fn delete_availability_set(&self, resource_group: &str, name: &str) -> Result<(), CloudError>;

    // Network interfaces
    async fn get_network_interface(&self, resource_group: &str, name: &str) -> Result<NetworkInterface, CloudError>;
    async fn reconcile_network_interface(&self, spec: &NetworkInterfaceSpec) -> Result<(), CloudError>;
    async fn delete_network_interface(&self, resource_group: &str, name: &str) -> Result<(), CloudError>;

    // Disks
    async fn get_disk(&self, resource_group: &str, name: &str) -> Result<Disk, CloudError>;
    async fn reconcile_disk(&self, spec: &DiskSpec) -> Result<(), CloudError>;
    async fn delete_disk(&self, resource_group: &str, name: &str) -> Result<(), CloudError>;

    // Virtual machines
    async fn get_virtual_machine(&self, resource_group: &str, name: &str) -> Result<VirtualMachine, CloudError>;
    async fn reconcile_virtual_machine(&self, spec: &VirtualMachineSpec) -> Result<(), CloudError>;
    async fn delete_virtual_machine(&self, resource_group: &str, name: &str) -> Result<(), CloudError>;

    // Load balancers
    async fn get_load_balancer(&self, resource_group: &str, name: &str) -> Result<LoadBalancer, CloudError>;
    async fn reconcile_load_balancer(&self, spec: &LoadBalancerSpec) -> Result<(), CloudError>;
    async fn delete_load_balancer(&self, resource_group: &str, name: &str) -> Result<(), CloudError>;
}
