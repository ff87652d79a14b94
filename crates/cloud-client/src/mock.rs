//! Mock CloudClient for unit testing
//!
//! Stores resources in memory, records every call and can be told to fail
//! specific operations or to report scripted virtual machine states.

use crate::cloud_trait::CloudClientTrait;
use crate::error::{CloudError, codes};
use crate::models::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Key = (String, String);

fn key(resource_group: &str, name: &str) -> Key {
    (resource_group.to_string(), name.to_string())
}

/// Mock CloudClient for testing
///
/// Clones share state, so a test can keep a handle while the code under test
/// owns an `Arc<dyn CloudClientTrait>`.
#[derive(Clone, Debug)]
pub struct MockCloudClient {
    pub(crate) base_url: String,
    pub(crate) groups: Arc<Mutex<HashMap<String, Group>>>,
    pub(crate) virtual_networks: Arc<Mutex<HashMap<Key, VirtualNetwork>>>,
    pub(crate) key_vaults: Arc<Mutex<HashMap<Key, KeyVault>>>,
    pub(crate) availability_sets: Arc<Mutex<HashMap<Key, AvailabilitySet>>>,
    pub(crate) network_interfaces: Arc<Mutex<HashMap<Key, NetworkInterface>>>,
    pub(crate) disks: Arc<Mutex<HashMap<Key, Disk>>>,
    pub(crate) virtual_machines: Arc<Mutex<HashMap<Key, VirtualMachine>>>,
    pub(crate) load_balancers: Arc<Mutex<HashMap<Key, LoadBalancer>>>,
    // Call log, as "operation:name"
    pub(crate) calls: Arc<Mutex<Vec<String>>>,
    // Injected failures by operation name
    pub(crate) errors: Arc<Mutex<HashMap<String, (String, String)>>>,
    // State reported for newly created VMs
    pub(crate) default_vm_state: Arc<Mutex<String>>,
    pub(crate) vm_states: Arc<Mutex<HashMap<String, String>>>,
    pub(crate) load_balancer_address: Arc<Mutex<Option<String>>>,
    pub(crate) next_ip: Arc<Mutex<u32>>,
}

impl Default for MockCloudClient {
    fn default() -> Self {
        Self::new("http://mock-cloud-agent")
    }
}

impl MockCloudClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            groups: Arc::new(Mutex::new(HashMap::new())),
            virtual_networks: Arc::new(Mutex::new(HashMap::new())),
            key_vaults: Arc::new(Mutex::new(HashMap::new())),
            availability_sets: Arc::new(Mutex::new(HashMap::new())),
            network_interfaces: Arc::new(Mutex::new(HashMap::new())),
            disks: Arc::new(Mutex::new(HashMap::new())),
            virtual_machines: Arc::new(Mutex::new(HashMap::new())),
            load_balancers: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            errors: Arc::new(Mutex::new(HashMap::new())),
            default_vm_state: Arc::new(Mutex::new("Succeeded".to_string())),
            vm_states: Arc::new(Mutex::new(HashMap::new())),
            load_balancer_address: Arc::new(Mutex::new(Some("10.0.0.100".to_string()))),
            next_ip: Arc::new(Mutex::new(4)),
        }
    }

    // ---- call log ----

    /// Every call made so far, as "operation:name"
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls for one operation, as resource names
    pub fn calls_for(&self, op: &str) -> Vec<String> {
        let prefix = format!("{}:", op);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Calls that mutate the backend (reconcile_* and delete_*)
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("reconcile_") || c.starts_with("delete_"))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    // ---- failure injection ----

    /// Make every call of `op` fail with `code` until cleared.
    ///
    /// `codes::NOT_FOUND` and `codes::ALREADY_EXISTS` produce the dedicated
    /// error variants; anything else is returned as [`CloudError::Api`].
    pub fn inject_error(&self, op: &str, code: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .insert(op.to_string(), (code.to_string(), message.to_string()));
    }

    pub fn clear_error(&self, op: &str) {
        self.errors.lock().unwrap().remove(op);
    }

    pub fn clear_errors(&self) {
        self.errors.lock().unwrap().clear();
    }

    // ---- scripting ----

    /// State reported by VMs created from now on
    pub fn set_default_vm_state(&self, state: &str) {
        *self.default_vm_state.lock().unwrap() = state.to_string();
    }

    /// Pin the state of one VM, including an existing one
    pub fn set_vm_state(&self, name: &str, state: &str) {
        self.vm_states
            .lock()
            .unwrap()
            .insert(name.to_string(), state.to_string());
        for vm in self.virtual_machines.lock().unwrap().values_mut() {
            if vm.name == name {
                vm.provisioning_state = state.to_string();
            }
        }
    }

    /// Frontend address assigned to load balancers (None = not yet assigned)
    pub fn set_load_balancer_address(&self, address: Option<&str>) {
        let address = address.map(str::to_string);
        *self.load_balancer_address.lock().unwrap() = address.clone();
        for lb in self.load_balancers.lock().unwrap().values_mut() {
            lb.frontend_ip = address.clone();
        }
    }

    // ---- seeding and inspection ----

    pub fn add_virtual_machine(&self, vm: VirtualMachine) {
        if let Some(set) = &vm.availability_set {
            self.join_availability_set(&vm.resource_group, set, &vm.name);
        }
        self.virtual_machines
            .lock()
            .unwrap()
            .insert(key(&vm.resource_group, &vm.name), vm);
    }

    pub fn add_availability_set(&self, set: AvailabilitySet) {
        self.availability_sets
            .lock()
            .unwrap()
            .insert(key(&set.resource_group, &set.name), set);
    }

    pub fn virtual_machine(&self, resource_group: &str, name: &str) -> Option<VirtualMachine> {
        self.virtual_machines.lock().unwrap().get(&key(resource_group, name)).cloned()
    }

    pub fn availability_set(&self, resource_group: &str, name: &str) -> Option<AvailabilitySet> {
        self.availability_sets.lock().unwrap().get(&key(resource_group, name)).cloned()
    }

    pub fn network_interface(&self, resource_group: &str, name: &str) -> Option<NetworkInterface> {
        self.network_interfaces.lock().unwrap().get(&key(resource_group, name)).cloned()
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.lock().unwrap().contains_key(name)
    }

    pub fn has_virtual_network(&self, resource_group: &str, name: &str) -> bool {
        self.virtual_networks.lock().unwrap().contains_key(&key(resource_group, name))
    }

    pub fn has_key_vault(&self, resource_group: &str, name: &str) -> bool {
        self.key_vaults.lock().unwrap().contains_key(&key(resource_group, name))
    }

    pub fn has_disk(&self, resource_group: &str, name: &str) -> bool {
        self.disks.lock().unwrap().contains_key(&key(resource_group, name))
    }

    pub fn has_load_balancer(&self, resource_group: &str, name: &str) -> bool {
        self.load_balancers.lock().unwrap().contains_key(&key(resource_group, name))
    }

    pub fn virtual_machine_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .virtual_machines
            .lock()
            .unwrap()
            .values()
            .map(|vm| vm.name.clone())
            .collect();
        names.sort();
        names
    }

    // ---- internals ----

    fn record(&self, op: &str, name: &str) -> Result<(), CloudError> {
        self.calls.lock().unwrap().push(format!("{}:{}", op, name));
        match self.errors.lock().unwrap().get(op) {
            None => Ok(()),
            Some((code, message)) => Err(match code.as_str() {
                codes::NOT_FOUND => CloudError::NotFound(name.to_string()),
                codes::ALREADY_EXISTS => CloudError::AlreadyExists(name.to_string()),
                _ => CloudError::Api { code: code.clone(), message: message.clone() },
            }),
        }
    }

    fn join_availability_set(&self, resource_group: &str, set: &str, vm: &str) {
        if let Some(set) = self.availability_sets.lock().unwrap().get_mut(&key(resource_group, set)) {
            if !set.virtual_machines.iter().any(|m| m == vm) {
                set.virtual_machines.push(vm.to_string());
            }
        }
    }

    fn leave_availability_sets(&self, resource_group: &str, vm: &str) {
        for ((rg, _), set) in self.availability_sets.lock().unwrap().iter_mut() {
            if rg == resource_group {
                set.virtual_machines.retain(|m| m != vm);
            }
        }
    }

    fn allocate_ip(&self) -> String {
        let mut next = self.next_ip.lock().unwrap();
        let ip = format!("10.0.1.{}", *next);
        *next += 1;
        ip
    }

    fn not_found(kind: &str, name: &str) -> CloudError {
        CloudError::NotFound(format!("{} {}", kind, name))
    }
}

#[async_trait::async_trait]
impl CloudClientTrait for MockCloudClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_connection(&self) -> Result<(), CloudError> {
        self.record("validate_connection", "")
    }

    async fn get_group(&self, name: &str) -> Result<Group, CloudError> {
        self.record("get_group", name)?;
        self.groups
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Self::not_found("group", name))
    }

    async fn reconcile_group(&self, spec: &GroupSpec) -> Result<(), CloudError> {
        self.record("reconcile_group", &spec.name)?;
        self.groups.lock().unwrap().insert(
            spec.name.clone(),
            Group {
                name: spec.name.clone(),
                location: spec.location.clone(),
                provisioning_state: "Succeeded".to_string(),
            },
        );
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> Result<(), CloudError> {
        self.record("delete_group", name)?;
        self.groups
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("group", name))
    }

    async fn get_virtual_network(&self, resource_group: &str, name: &str) -> Result<VirtualNetwork, CloudError> {
        self.record("get_virtual_network", name)?;
        self.virtual_networks
            .lock()
            .unwrap()
            .get(&key(resource_group, name))
            .cloned()
            .ok_or_else(|| Self::not_found("virtual network", name))
    }

    async fn reconcile_virtual_network(&self, spec: &VirtualNetworkSpec) -> Result<(), CloudError> {
        self.record("reconcile_virtual_network", &spec.name)?;
        self.virtual_networks.lock().unwrap().insert(
            key(&spec.resource_group, &spec.name),
            VirtualNetwork {
                name: spec.name.clone(),
                resource_group: spec.resource_group.clone(),
                subnets: spec.subnets.clone(),
            },
        );
        Ok(())
    }

    async fn delete_virtual_network(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.record("delete_virtual_network", name)?;
        self.virtual_networks
            .lock()
            .unwrap()
            .remove(&key(resource_group, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found("virtual network", name))
    }

    async fn get_key_vault(&self, resource_group: &str, name: &str) -> Result<KeyVault, CloudError> {
        self.record("get_key_vault", name)?;
        self.key_vaults
            .lock()
            .unwrap()
            .get(&key(resource_group, name))
            .cloned()
            .ok_or_else(|| Self::not_found("key vault", name))
    }

    async fn reconcile_key_vault(&self, spec: &KeyVaultSpec) -> Result<(), CloudError> {
        self.record("reconcile_key_vault", &spec.name)?;
        self.key_vaults.lock().unwrap().insert(
            key(&spec.resource_group, &spec.name),
            KeyVault { name: spec.name.clone(), resource_group: spec.resource_group.clone() },
        );
        Ok(())
    }

    async fn delete_key_vault(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.record("delete_key_vault", name)?;
        self.key_vaults
            .lock()
            .unwrap()
            .remove(&key(resource_group, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found("key vault", name))
    }

    async fn get_availability_set(&self, resource_group: &str, name: &str) -> Result<AvailabilitySet, CloudError> {
        self.record("get_availability_set", name)?;
        self.availability_set(resource_group, name)
            .ok_or_else(|| Self::not_found("availability set", name))
    }

    async fn reconcile_availability_set(&self, spec: &AvailabilitySetSpec) -> Result<(), CloudError> {
        self.record("reconcile_availability_set", &spec.name)?;
        self.availability_sets
            .lock()
            .unwrap()
            .entry(key(&spec.resource_group, &spec.name))
            .or_insert_with(|| AvailabilitySet {
                name: spec.name.clone(),
                resource_group: spec.resource_group.clone(),
                virtual_machines: Vec::new(),
            });
        Ok(())
    }

    async fn delete_availability_set(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.record("delete_availability_set", name)?;
        self.availability_sets
            .lock()
            .unwrap()
            .remove(&key(resource_group, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found("availability set", name))
    }

    async fn get_network_interface(&self, resource_group: &str, name: &str) -> Result<NetworkInterface, CloudError> {
        self.record("get_network_interface", name)?;
        self.network_interface(resource_group, name)
            .ok_or_else(|| Self::not_found("network interface", name))
    }

    async fn reconcile_network_interface(&self, spec: &NetworkInterfaceSpec) -> Result<(), CloudError> {
        self.record("reconcile_network_interface", &spec.name)?;
        let existing_ip = self
            .network_interface(&spec.resource_group, &spec.name)
            .and_then(|nic| nic.private_ip);
        let private_ip = existing_ip.unwrap_or_else(|| self.allocate_ip());
        self.network_interfaces.lock().unwrap().insert(
            key(&spec.resource_group, &spec.name),
            NetworkInterface {
                name: spec.name.clone(),
                resource_group: spec.resource_group.clone(),
                private_ip: Some(private_ip),
                backend_pool_names: spec.backend_pool_names.clone(),
            },
        );
        Ok(())
    }

    async fn delete_network_interface(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.record("delete_network_interface", name)?;
        self.network_interfaces
            .lock()
            .unwrap()
            .remove(&key(resource_group, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found("network interface", name))
    }

    async fn get_disk(&self, resource_group: &str, name: &str) -> Result<Disk, CloudError> {
        self.record("get_disk", name)?;
        self.disks
            .lock()
            .unwrap()
            .get(&key(resource_group, name))
            .cloned()
            .ok_or_else(|| Self::not_found("disk", name))
    }

    async fn reconcile_disk(&self, spec: &DiskSpec) -> Result<(), CloudError> {
        self.record("reconcile_disk", &spec.name)?;
        self.disks.lock().unwrap().insert(
            key(&spec.resource_group, &spec.name),
            Disk {
                name: spec.name.clone(),
                resource_group: spec.resource_group.clone(),
                size_gb: spec.size_gb,
            },
        );
        Ok(())
    }

    async fn delete_disk(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.record("delete_disk", name)?;
        self.disks
            .lock()
            .unwrap()
            .remove(&key(resource_group, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found("disk", name))
    }

    async fn get_virtual_machine(&self, resource_group: &str, name: &str) -> Result<VirtualMachine, CloudError> {
        self.record("get_virtual_machine", name)?;
        self.virtual_machine(resource_group, name)
            .ok_or_else(|| Self::not_found("virtual machine", name))
    }

    async fn reconcile_virtual_machine(&self, spec: &VirtualMachineSpec) -> Result<(), CloudError> {
        self.record("reconcile_virtual_machine", &spec.name)?;

        let state = match self.vm_states.lock().unwrap().get(&spec.name) {
            Some(state) => state.clone(),
            None => self.default_vm_state.lock().unwrap().clone(),
        };
        let addresses = spec
            .nic_names
            .iter()
            .filter_map(|nic| self.network_interface(&spec.resource_group, nic))
            .filter_map(|nic| nic.private_ip)
            .map(|address| VmAddress { type_: "InternalIP".to_string(), address })
            .collect();

        if let Some(set) = &spec.availability_set {
            self.join_availability_set(&spec.resource_group, set, &spec.name);
        }

        let mut vms = self.virtual_machines.lock().unwrap();
        let vm = vms
            .entry(key(&spec.resource_group, &spec.name))
            .or_insert_with(|| VirtualMachine {
                name: spec.name.clone(),
                resource_group: spec.resource_group.clone(),
                provisioning_state: state,
                availability_set: None,
                zone: None,
                addresses: Vec::new(),
            });
        vm.availability_set = spec.availability_set.clone();
        vm.zone = spec.zone.clone();
        vm.addresses = addresses;
        Ok(())
    }

    async fn delete_virtual_machine(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.record("delete_virtual_machine", name)?;
        let removed = self
            .virtual_machines
            .lock()
            .unwrap()
            .remove(&key(resource_group, name));
        match removed {
            Some(_) => {
                self.leave_availability_sets(resource_group, name);
                Ok(())
            }
            None => Err(Self::not_found("virtual machine", name)),
        }
    }

    async fn get_load_balancer(&self, resource_group: &str, name: &str) -> Result<LoadBalancer, CloudError> {
        self.record("get_load_balancer", name)?;
        self.load_balancers
            .lock()
            .unwrap()
            .get(&key(resource_group, name))
            .cloned()
            .ok_or_else(|| Self::not_found("load balancer", name))
    }

    async fn reconcile_load_balancer(&self, spec: &LoadBalancerSpec) -> Result<(), CloudError> {
        self.record("reconcile_load_balancer", &spec.name)?;
        let address = self.load_balancer_address.lock().unwrap().clone();
        self.load_balancers.lock().unwrap().insert(
            key(&spec.resource_group, &spec.name),
            LoadBalancer {
                name: spec.name.clone(),
                resource_group: spec.resource_group.clone(),
                frontend_ip: address,
                frontend_port: spec.frontend_port,
                backend_pool_name: spec.backend_pool_name.clone(),
            },
        );
        Ok(())
    }

    async fn delete_load_balancer(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.record("delete_load_balancer", name)?;
        self.load_balancers
            .lock()
            .unwrap()
            .remove(&key(resource_group, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found("load balancer", name))
    }
}
