//! Cloud agent data models
//!
//! Each resource kind has a `*Spec` (the desired shape sent on reconcile)
//! and a resource type (what the agent reports back on get).

use serde::{Deserialize, Serialize};

/// Resource group (top-level container for a cluster's resources)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    pub name: String,
    pub location: String,
}

/// Resource group as reported by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub provisioning_state: String,
}

/// Subnet inside a virtual network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
}

/// Virtual network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,
}

/// Virtual network as reported by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetwork {
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,
}

/// Key vault (per-cluster secret store)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyVaultSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
}

/// Key vault as reported by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyVault {
    pub name: String,
    pub resource_group: String,
}

/// Availability set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySetSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
}

/// Availability set as reported by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySet {
    pub name: String,
    pub resource_group: String,
    /// Names of the virtual machines currently placed in the set
    #[serde(default)]
    pub virtual_machines: Vec<String>,
}

/// Network interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub vnet_name: String,
    pub subnet_name: String,
    /// Load balancer backend pools the interface joins
    #[serde(default)]
    pub backend_pool_names: Vec<String>,
}

/// Network interface as reported by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub backend_pool_names: Vec<String>,
}

/// Managed disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiskSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub size_gb: u32,
    pub disk_type: String,
}

/// Managed disk as reported by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub resource_group: String,
    pub size_gb: u32,
}

/// Virtual machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub vm_size: String,
    pub image_name: String,
    pub image_version: String,
    pub os_disk_name: String,
    pub nic_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub admin_username: String,
    /// Decoded OpenSSH public key
    pub ssh_public_key: String,
    /// Base64 cloud-init payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
}

/// Virtual machine as reported by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    pub name: String,
    pub resource_group: String,
    /// Raw provisioning state (e.g., "Creating", "Succeeded", "Failed")
    pub provisioning_state: String,
    #[serde(default)]
    pub availability_set: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub addresses: Vec<VmAddress>,
}

/// Address attached to a virtual machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VmAddress {
    /// Address type (e.g., "InternalIP")
    #[serde(rename = "type")]
    pub type_: String,
    pub address: String,
}

/// Load balancer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub frontend_port: i32,
    pub backend_pool_name: String,
}

/// Load balancer as reported by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub name: String,
    pub resource_group: String,
    /// Frontend address; absent until the backend assigns one
    #[serde(default)]
    pub frontend_ip: Option<String>,
    pub frontend_port: i32,
    pub backend_pool_name: String,
}

/// Error body returned by the agent on non-success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_machine_defaults() {
        let vm: VirtualMachine = serde_json::from_str(
            r#"{"name":"vm-1","resourceGroup":"rg","provisioningState":"Creating"}"#,
        )
        .unwrap();
        assert_eq!(vm.provisioning_state, "Creating");
        assert!(vm.addresses.is_empty());
        assert!(vm.availability_set.is_none());
    }

    #[test]
    fn test_vm_spec_omits_empty_optionals() {
        let spec = VirtualMachineSpec {
            name: "vm-1".into(),
            resource_group: "rg".into(),
            location: "westus".into(),
            vm_size: "Standard_D2s_v3".into(),
            image_name: "ubuntu".into(),
            image_version: "1.0".into(),
            os_disk_name: "vm-1-os-disk".into(),
            nic_names: vec!["vm-1-nic".into()],
            availability_set: None,
            zone: None,
            admin_username: "fleet".into(),
            ssh_public_key: "ssh-ed25519 AAAA".into(),
            custom_data: None,
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert!(json.get("zone").is_none());
        assert_eq!(json["osDiskName"], "vm-1-os-disk");
    }
}
