//! FleetMachine reconciler
//!
//! Maps a Cluster API machine onto a FleetVirtualMachine of the same name
//! and mirrors the VM's state back.

use super::virtual_machine::UPDATE_ERROR;
use super::{RESYNC_INTERVAL, SHORT_REQUEUE, VM_DELETE_REQUEUE, same_spec};
use crate::context::Context;
use crate::error::ControllerError;
use crate::events::{actions, reasons as event_reasons};
use crate::scope::MachineScope;
use crate::store::{add_finalizer, is_deleting, remove_finalizer};
use crds::conditions::{self, BOOTSTRAP_READY, NETWORK_INFRASTRUCTURE_READY, VM_RUNNING, reasons};
use crds::labels::{self, MACHINE_FINALIZER};
use crds::{
    ConditionSeverity, FleetCluster, FleetMachine, FleetVirtualMachine, FleetVirtualMachineSpec, Machine, VmState,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Conditions rolled into the machine's `Ready` condition.
const TRACKED: &[&str] = &[BOOTSTRAP_READY, VM_RUNNING];

/// Provider id assigned once the VM is running.
pub fn provider_id(resource_group: &str, name: &str) -> String {
    format!("fleet://{resource_group}/{name}")
}

pub(crate) async fn reconcile(scope: &mut MachineScope, ctx: &Context) -> Result<Action, ControllerError> {
    let result = if is_deleting(&scope.object) {
        reconcile_delete(scope, ctx).await
    } else {
        reconcile_normal(scope, ctx).await
    };

    conditions::summarize(&mut scope.object, TRACKED, false);
    let phase = conditions::derive_phase(
        is_deleting(&scope.object),
        scope.object.has_failure(),
        conditions::is_true(&scope.object, VM_RUNNING),
    );
    scope.object.status_mut().phase = phase;
    result
}

/// Name of the owning Cluster API machine, from the owner references.
pub(crate) fn owner_machine_name(machine: &FleetMachine) -> Option<String> {
    machine
        .metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.kind == Machine::kind(&()) && r.api_version == Machine::api_version(&()))
        .map(|r| r.name.clone())
}

async fn reconcile_normal(scope: &mut MachineScope, ctx: &Context) -> Result<Action, ControllerError> {
    if scope.object.has_failure() {
        debug!(machine = %scope.name(), "Machine has a terminal failure, waiting for a change");
        return Ok(Action::await_change());
    }

    if add_finalizer(&mut scope.object, MACHINE_FINALIZER) {
        scope.checkpoint(ctx.machines.as_ref()).await?;
    }

    let namespace = scope.namespace().to_string();
    let name = scope.name().to_string();

    let owner = match owner_machine_name(&scope.object) {
        Some(owner_name) => ctx.owner_machines.get(&namespace, &owner_name).await?,
        None => None,
    };
    let Some(owner) = owner else {
        info!(machine = %name, "Waiting for owner Machine");
        conditions::mark_false(
            &mut scope.object,
            BOOTSTRAP_READY,
            reasons::WAITING_FOR_OWNER,
            ConditionSeverity::Info,
            "owner Machine is not set yet",
        );
        return Ok(Action::requeue(SHORT_REQUEUE));
    };

    let cluster_name = scope
        .object
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::CLUSTER_NAME))
        .cloned()
        .or_else(|| Some(owner.spec.cluster_name.clone()).filter(|c| !c.is_empty()))
        .ok_or_else(|| ControllerError::Validation(format!("machine {name} has no {} label", labels::CLUSTER_NAME)))?;

    let cluster = ctx.clusters.get(&namespace, &cluster_name).await?;
    let Some(cluster) = cluster.filter(|c| conditions::is_true(c, NETWORK_INFRASTRUCTURE_READY)) else {
        debug!(machine = %name, cluster = %cluster_name, "Cluster network infrastructure not ready");
        conditions::mark_false(
            &mut scope.object,
            VM_RUNNING,
            reasons::WAITING_FOR_CLUSTER_INFRASTRUCTURE,
            ConditionSeverity::Info,
            format!("waiting for cluster {cluster_name} network infrastructure"),
        );
        return Ok(Action::requeue(SHORT_REQUEUE));
    };

    let bootstrap_data = match ctx.bootstrap.bootstrap_data(&namespace, &owner).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            debug!(machine = %name, "Bootstrap data not available yet");
            conditions::mark_false(
                &mut scope.object,
                BOOTSTRAP_READY,
                reasons::WAITING_FOR_BOOTSTRAP_DATA,
                ConditionSeverity::Info,
                "bootstrap data secret is not available yet",
            );
            return Ok(Action::requeue(SHORT_REQUEUE));
        }
        Err(e) => {
            warn!(machine = %name, error = %e, "Failed to read bootstrap data");
            conditions::mark_false(
                &mut scope.object,
                BOOTSTRAP_READY,
                reasons::WAITING_FOR_BOOTSTRAP_DATA,
                ConditionSeverity::Warning,
                e.to_string(),
            );
            return Ok(Action::requeue(SHORT_REQUEUE));
        }
    };
    conditions::mark_true(&mut scope.object, BOOTSTRAP_READY);

    let desired = desired_virtual_machine(&scope.object, &cluster, &namespace, &name, bootstrap_data)?;
    let vm = match ctx.virtual_machines.get(&namespace, &name).await? {
        None => {
            info!(machine = %name, "Creating FleetVirtualMachine");
            ctx.normal(&scope.object, event_reasons::PROVISIONING, actions::RECONCILE, "Creating virtual machine")
                .await;
            ctx.virtual_machines.create(&desired).await?
        }
        Some(mut existing) => {
            if same_spec(&existing.spec, &desired.spec)? {
                existing
            } else {
                debug!(machine = %name, "Updating FleetVirtualMachine spec");
                existing.spec = desired.spec;
                ctx.virtual_machines.update(&existing).await?
            }
        }
    };

    mirror_virtual_machine(&mut scope.object, &vm, &cluster.spec.resource_group, &name);

    if scope.object.has_failure() {
        ctx.warning(&scope.object, event_reasons::VM_FAILED, actions::RECONCILE, "Virtual machine failed")
            .await;
        return Ok(Action::await_change());
    }
    if scope.object.status.as_ref().is_some_and(|s| s.ready) {
        Ok(Action::requeue(RESYNC_INTERVAL))
    } else {
        Ok(Action::requeue(SHORT_REQUEUE))
    }
}

/// The FleetVirtualMachine backing `machine`.
pub fn desired_virtual_machine(
    machine: &FleetMachine,
    cluster: &FleetCluster,
    namespace: &str,
    name: &str,
    bootstrap_data: String,
) -> Result<FleetVirtualMachine, ControllerError> {
    let subnet = cluster.default_subnet()?;
    let cluster_name = cluster.metadata.name.clone().unwrap_or_default();

    let vm_labels = BTreeMap::from([
        (labels::CLUSTER_NAME.to_string(), cluster_name.clone()),
        (labels::MACHINE_ROLE.to_string(), labels::ROLE_MACHINE.to_string()),
    ]);
    let annotations = cluster
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(labels::CORRELATION_ID))
        .map(|id| BTreeMap::from([(labels::CORRELATION_ID.to_string(), id.clone())]));

    let spec = &machine.spec;
    Ok(FleetVirtualMachine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(vm_labels),
            annotations,
            owner_references: machine.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: FleetVirtualMachineSpec {
            vm_size: spec.vm_size.clone(),
            image: spec.image.clone(),
            os_disk: spec.os_disk.clone(),
            location: spec.location.clone(),
            availability_zone: spec.availability_zone.clone(),
            availability_set: spec.availability_set.clone(),
            resource_group: cluster.spec.resource_group.clone(),
            cluster_name,
            vnet_name: cluster.spec.network_spec.vnet.name.clone(),
            subnet_name: subnet.name.clone(),
            ssh_public_key: spec.ssh_public_key.clone(),
            bootstrap_data: Some(bootstrap_data),
            backend_pool_names: Vec::new(),
        },
        status: None,
    })
}

/// Copy state, addresses and readiness from the VM into the machine.
fn mirror_virtual_machine(machine: &mut FleetMachine, vm: &FleetVirtualMachine, resource_group: &str, name: &str) {
    let vm_status = vm.status.clone().unwrap_or_default();

    match conditions::get(vm, VM_RUNNING) {
        Some(condition) => conditions::set(machine, condition.clone()),
        None => conditions::mark_false(
            machine,
            VM_RUNNING,
            reasons::VM_PROVISIONING,
            ConditionSeverity::Info,
            "waiting for virtual machine",
        ),
    }

    let status = machine.status_mut();
    status.ready = vm_status.ready;
    status.addresses = vm_status.addresses;
    status.vm_state = vm_status.vm_state.clone();

    match &vm_status.vm_state {
        Some(VmState::Unknown(raw)) => {
            status.failure_reason = Some(UPDATE_ERROR.to_string());
            status.failure_message = Some(format!("unexpected virtual machine state {raw}"));
        }
        _ if vm_status.failure_reason.is_some() => {
            status.failure_reason = vm_status.failure_reason;
            status.failure_message = vm_status.failure_message;
        }
        _ => {}
    }

    let ready = status.ready;
    if ready && machine.spec.provider_id.is_none() {
        let id = provider_id(resource_group, name);
        info!(machine = %name, provider_id = %id, "Machine is running");
        machine.spec.provider_id = Some(id);
    }
}

async fn reconcile_delete(scope: &mut MachineScope, ctx: &Context) -> Result<Action, ControllerError> {
    let namespace = scope.namespace().to_string();
    let name = scope.name().to_string();
    let machine = &mut scope.object;
    machine.status_mut().ready = false;
    conditions::mark_false(machine, VM_RUNNING, reasons::DELETING, ConditionSeverity::Info, "deleting virtual machine");

    if let Some(vm) = ctx.virtual_machines.get(&namespace, &name).await? {
        if !is_deleting(&vm) {
            info!(machine = %name, "Deleting FleetVirtualMachine");
            ctx.normal(&*machine, event_reasons::DELETING, actions::DELETE, "Deleting virtual machine")
                .await;
            ctx.virtual_machines.delete(&namespace, &name).await?;
        }
        return Ok(Action::requeue(VM_DELETE_REQUEUE));
    }

    info!(machine = %name, "Virtual machine gone, releasing machine");
    remove_finalizer(machine, MACHINE_FINALIZER);
    Ok(Action::await_change())
}
