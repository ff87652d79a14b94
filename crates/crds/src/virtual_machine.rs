//! FleetVirtualMachine CRD
//!
//! The leaf compute abstraction. Created by the machine reconciler for tenant
//! machines and by the load balancer reconciler for replicas.

use crate::common::{Image, MachineAddress, OsDisk, VmState};
use crate::conditions::{Condition, Conditioned};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.fleet.dev",
    version = "v1alpha1",
    kind = "FleetVirtualMachine",
    namespaced,
    status = "FleetVirtualMachineStatus",
    shortname = "fvm",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.vmState"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FleetVirtualMachineSpec {
    /// VM size
    pub vm_size: String,

    /// OS image
    pub image: Image,

    /// OS disk
    #[serde(default)]
    pub os_disk: OsDisk,

    /// Backend location
    pub location: String,

    /// Requested availability zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    /// Availability set to join
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_set: Option<String>,

    /// Resource group of the owning cluster
    pub resource_group: String,

    /// Owning cluster name
    pub cluster_name: String,

    /// Virtual network the NIC attaches to
    pub vnet_name: String,

    /// Subnet the NIC attaches to
    pub subnet_name: String,

    /// Base64 encoded SSH public key
    pub ssh_public_key: String,

    /// Base64 encoded cloud-init/ignition payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_data: Option<String>,

    /// Load balancer backend pools the NIC joins
    #[serde(default)]
    pub backend_pool_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct FleetVirtualMachineStatus {
    /// VM is provisioned and running
    #[serde(default)]
    pub ready: bool,

    /// Provisioning state reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub vm_state: Option<VmState>,

    /// Addresses reported by the backend
    #[serde(default)]
    pub addresses: Vec<MachineAddress>,

    /// Fine-grained conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Terminal failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl FleetVirtualMachine {
    /// Status, created on first access.
    pub fn status_mut(&mut self) -> &mut FleetVirtualMachineStatus {
        self.status.get_or_insert_with(Default::default)
    }

    /// Whether the backend reports the VM as provisioned.
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Whether the backend reports the VM as failed.
    pub fn is_failed(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.vm_state == Some(VmState::Failed) || s.failure_reason.is_some())
    }
}

impl Conditioned for FleetVirtualMachine {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}
