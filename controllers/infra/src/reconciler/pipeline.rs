//! Machine provisioning pipeline.
//!
//! Creates the cloud resources behind one virtual machine in dependency
//! order (availability set, NIC, disk, VM) and tears them down in reverse.
//! Every step is idempotent so a pass interrupted half way can be retried
//! from the top.

use crate::error::ControllerError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cloud_client::{
    AvailabilitySetSpec, CloudClientTrait, CloudError, DiskSpec, NetworkInterfaceSpec, VirtualMachine,
    VirtualMachineSpec,
};
use crds::{FleetVirtualMachine, Image, OsDisk, VmState};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Locations that support availability zones.
///
/// Static policy table; the live capability query stays disabled.
pub const ZONE_CAPABLE_LOCATIONS: &[&str] = &[
    "centralus",
    "eastus",
    "eastus2",
    "westus2",
    "westus3",
    "northeurope",
    "westeurope",
    "francecentral",
    "uksouth",
    "japaneast",
    "southeastasia",
    "australiaeast",
];

/// Login user created on every VM.
pub const ADMIN_USERNAME: &str = "fleet";

/// Zone to request for a VM in `location`, if any.
pub fn select_zone(location: &str, requested: Option<&str>) -> Option<String> {
    let requested = requested.map(str::trim).filter(|z| !z.is_empty())?;
    if ZONE_CAPABLE_LOCATIONS.contains(&location.to_ascii_lowercase().as_str()) {
        Some(requested.to_string())
    } else {
        debug!(location, zone = requested, "Location has no availability zones, ignoring zone");
        None
    }
}

/// Network interface created for `vm_name`.
pub fn nic_name(vm_name: &str) -> String {
    format!("{vm_name}-nic")
}

/// OS disk created for `vm_name`.
pub fn disk_name(vm_name: &str) -> String {
    format!("{vm_name}-os-disk")
}

/// Decode a base64 OpenSSH public key.
///
/// Malformed key material is a validation error: nothing is created for a
/// machine whose key cannot be installed.
pub fn decode_ssh_key(encoded: &str) -> Result<String, ControllerError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ControllerError::Validation(format!("sshPublicKey is not valid base64: {e}")))?;
    let key = String::from_utf8(bytes)
        .map_err(|_| ControllerError::Validation("sshPublicKey does not decode to text".to_string()))?;
    let key = key.trim();
    let mut fields = key.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(algorithm), Some(_)) if algorithm.starts_with("ssh-") || algorithm.starts_with("ecdsa-") => {
            Ok(key.to_string())
        }
        _ => Err(ControllerError::Validation(
            "sshPublicKey is not an OpenSSH public key".to_string(),
        )),
    }
}

/// Everything the pipeline needs to build or tear down one VM.
#[derive(Debug, Clone, PartialEq)]
pub struct MachinePlan {
    /// Cloud VM name
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub vm_size: String,
    pub image: Image,
    pub os_disk: OsDisk,
    /// Already filtered through [`select_zone`]
    pub zone: Option<String>,
    pub availability_set: Option<String>,
    pub vnet_name: String,
    pub subnet_name: String,
    /// Base64 encoded, decoded on create
    pub ssh_public_key: String,
    /// Base64 bootstrap payload
    pub custom_data: Option<String>,
    pub backend_pool_names: Vec<String>,
}

impl MachinePlan {
    /// Plan for the cloud VM `name` backing `vm`. Zones are dropped where
    /// the location has none.
    pub fn for_virtual_machine(name: &str, vm: &FleetVirtualMachine) -> Self {
        let spec = &vm.spec;
        Self {
            name: name.to_string(),
            resource_group: spec.resource_group.clone(),
            location: spec.location.clone(),
            vm_size: spec.vm_size.clone(),
            image: spec.image.clone(),
            os_disk: spec.os_disk.clone(),
            zone: select_zone(&spec.location, spec.availability_zone.as_deref()),
            availability_set: spec.availability_set.clone().filter(|s| !s.is_empty()),
            vnet_name: spec.vnet_name.clone(),
            subnet_name: spec.subnet_name.clone(),
            ssh_public_key: spec.ssh_public_key.clone(),
            custom_data: spec.bootstrap_data.clone(),
            backend_pool_names: spec.backend_pool_names.clone(),
        }
    }
}

/// Outcome of a create pass that did not end with a running VM.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The backend failed the VM; it has been deleted and the next pass
    /// starts from scratch.
    #[error("virtual machine {0} failed to provision and was deleted")]
    Failed(String),

    /// The VM exists but is not provisioned yet.
    #[error("virtual machine {name} is still provisioning (state {state})")]
    InProgress { name: String, state: VmState },

    /// The backend reported a state outside the known set.
    #[error("virtual machine {name} reported unexpected state {state}")]
    UnknownState { name: String, state: String },

    /// Any other failure, validation included.
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl ProvisionError {
    /// Whether a later pass can make progress without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Failed(_) | Self::InProgress { .. } => true,
            Self::UnknownState { .. } => false,
            Self::Controller(e) => !e.is_terminal(),
        }
    }
}

/// Runs create and delete against the cloud facade.
pub struct Pipeline<'a> {
    cloud: &'a dyn CloudClientTrait,
}

impl<'a> Pipeline<'a> {
    /// Pipeline over `cloud`.
    pub fn new(cloud: &'a dyn CloudClientTrait) -> Self {
        Self { cloud }
    }

    /// Ensure the VM and its dependencies exist and report a running VM.
    pub async fn create(&self, plan: &MachinePlan) -> Result<VirtualMachine, ProvisionError> {
        let ssh_public_key = decode_ssh_key(&plan.ssh_public_key)?;

        if let Some(set) = &plan.availability_set {
            let spec = AvailabilitySetSpec {
                name: set.clone(),
                resource_group: plan.resource_group.clone(),
                location: plan.location.clone(),
            };
            self.cloud
                .reconcile_availability_set(&spec)
                .await
                .map_err(|e| ControllerError::cloud("reconcile", "availability set", set, e))?;
        }

        let nic = nic_name(&plan.name);
        let nic_spec = NetworkInterfaceSpec {
            name: nic.clone(),
            resource_group: plan.resource_group.clone(),
            location: plan.location.clone(),
            vnet_name: plan.vnet_name.clone(),
            subnet_name: plan.subnet_name.clone(),
            backend_pool_names: plan.backend_pool_names.clone(),
        };
        self.cloud
            .reconcile_network_interface(&nic_spec)
            .await
            .map_err(|e| ControllerError::cloud("reconcile", "network interface", &nic, e))?;

        let disk = disk_name(&plan.name);
        let disk_spec = DiskSpec {
            name: disk.clone(),
            resource_group: plan.resource_group.clone(),
            location: plan.location.clone(),
            size_gb: plan.os_disk.size_gb,
            disk_type: plan.os_disk.disk_type.clone(),
        };
        self.cloud
            .reconcile_disk(&disk_spec)
            .await
            .map_err(|e| ControllerError::cloud("reconcile", "disk", &disk, e))?;

        let vm = match self.cloud.get_virtual_machine(&plan.resource_group, &plan.name).await {
            Ok(vm) => vm,
            Err(e) if e.is_not_found() => {
                info!(vm = %plan.name, size = %plan.vm_size, zone = ?plan.zone, "Creating virtual machine");
                let spec = VirtualMachineSpec {
                    name: plan.name.clone(),
                    resource_group: plan.resource_group.clone(),
                    location: plan.location.clone(),
                    vm_size: plan.vm_size.clone(),
                    image_name: plan.image.name.clone(),
                    image_version: plan.image.version.clone(),
                    os_disk_name: disk,
                    nic_names: vec![nic],
                    availability_set: plan.availability_set.clone(),
                    zone: plan.zone.clone(),
                    admin_username: ADMIN_USERNAME.to_string(),
                    ssh_public_key,
                    custom_data: plan.custom_data.clone(),
                };
                self.cloud
                    .reconcile_virtual_machine(&spec)
                    .await
                    .map_err(|e| ControllerError::cloud("create", "virtual machine", &plan.name, e))?;
                self.cloud
                    .get_virtual_machine(&plan.resource_group, &plan.name)
                    .await
                    .map_err(|e| ControllerError::cloud("get", "virtual machine", &plan.name, e))?
            }
            Err(e) => return Err(ControllerError::cloud("get", "virtual machine", &plan.name, e).into()),
        };

        match VmState::from(vm.provisioning_state.as_str()) {
            VmState::Succeeded => Ok(vm),
            VmState::Failed => {
                warn!(vm = %plan.name, "Virtual machine failed to provision, deleting it");
                self.delete_virtual_machine(&plan.resource_group, &plan.name).await?;
                Err(ProvisionError::Failed(plan.name.clone()))
            }
            VmState::Unknown(state) => Err(ProvisionError::UnknownState { name: plan.name.clone(), state }),
            state => Err(ProvisionError::InProgress { name: plan.name.clone(), state }),
        }
    }

    /// Tear down VM, NIC, disk and (when it has no other members) the
    /// availability set, in that order.
    pub async fn delete(&self, plan: &MachinePlan) -> Result<(), ControllerError> {
        info!(vm = %plan.name, "Deleting virtual machine resources");
        self.delete_virtual_machine(&plan.resource_group, &plan.name).await?;
        self.delete_network_interface(&plan.resource_group, &nic_name(&plan.name)).await?;
        self.delete_disk(&plan.resource_group, &disk_name(&plan.name)).await?;

        let Some(set) = &plan.availability_set else {
            return Ok(());
        };
        match self.cloud.get_availability_set(&plan.resource_group, set).await {
            Ok(existing) => {
                let others: Vec<&String> = existing.virtual_machines.iter().filter(|m| **m != plan.name).collect();
                if others.is_empty() {
                    self.delete_availability_set(&plan.resource_group, set).await
                } else {
                    debug!(availability_set = %set, members = others.len(), "Availability set still in use, keeping it");
                    Ok(())
                }
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ControllerError::cloud("get", "availability set", set, e)),
        }
    }

    /// Delete one resource; each of these treats not-found as done.
    pub async fn delete_virtual_machine(&self, resource_group: &str, name: &str) -> Result<(), ControllerError> {
        let result = self.cloud.delete_virtual_machine(resource_group, name).await;
        deleted("virtual machine", name, result)
    }

    pub async fn delete_network_interface(&self, resource_group: &str, name: &str) -> Result<(), ControllerError> {
        let result = self.cloud.delete_network_interface(resource_group, name).await;
        deleted("network interface", name, result)
    }

    pub async fn delete_disk(&self, resource_group: &str, name: &str) -> Result<(), ControllerError> {
        let result = self.cloud.delete_disk(resource_group, name).await;
        deleted("disk", name, result)
    }

    pub async fn delete_availability_set(&self, resource_group: &str, name: &str) -> Result<(), ControllerError> {
        let result = self.cloud.delete_availability_set(resource_group, name).await;
        deleted("availability set", name, result)
    }
}

/// Map a delete result, treating not-found as success.
pub(crate) fn deleted(kind: &'static str, name: &str, result: Result<(), CloudError>) -> Result<(), ControllerError> {
    match result {
        Ok(()) => {
            debug!("Deleted {} {}", kind, name);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!("{} {} already gone", kind, name);
            Ok(())
        }
        Err(e) => Err(ControllerError::cloud("delete", kind, name, e)),
    }
}
