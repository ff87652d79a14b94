//! FleetMachine CRD
//!
//! Infrastructure for one Cluster API machine. Each FleetMachine maps 1:1 to
//! a FleetVirtualMachine of the same name.

use crate::common::{Image, MachineAddress, OsDisk, VmState};
use crate::conditions::{Condition, Conditioned, Phase};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.fleet.dev",
    version = "v1alpha1",
    kind = "FleetMachine",
    namespaced,
    status = "FleetMachineStatus",
    shortname = "fm",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.vmState"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerId"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FleetMachineSpec {
    /// VM size
    pub vm_size: String,

    /// OS image
    pub image: Image,

    /// OS disk
    #[serde(default)]
    pub os_disk: OsDisk,

    /// Requested availability zone (honoured only in zone-capable locations)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    /// Backend location
    pub location: String,

    /// Base64 encoded SSH public key
    pub ssh_public_key: String,

    /// Availability set the VM joins (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_set: Option<String>,

    /// Set by the controller once the VM is provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct FleetMachineStatus {
    /// VM is provisioned and running
    #[serde(default)]
    pub ready: bool,

    /// Provisioning state mirrored from the VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub vm_state: Option<VmState>,

    /// Addresses mirrored from the VM
    #[serde(default)]
    pub addresses: Vec<MachineAddress>,

    /// Derived lifecycle phase
    #[serde(default)]
    pub phase: Phase,

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

impl FleetMachine {
    /// Status, created on first access.
    pub fn status_mut(&mut self) -> &mut FleetMachineStatus {
        self.status.get_or_insert_with(Default::default)
    }

    /// Whether a terminal failure has been recorded.
    pub fn has_failure(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.failure_reason.is_some() || s.failure_message.is_some())
    }
}

impl Conditioned for FleetMachine {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}
