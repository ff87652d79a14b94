//! FleetVirtualMachine reconciler
//!
//! Drives the provisioning pipeline for one VM and records the outcome in
//! the `VMRunning` condition.

use super::pipeline::{MachinePlan, Pipeline, ProvisionError};
use super::{RESYNC_INTERVAL, exhaustion_reason};
use crate::context::Context;
use crate::error::ControllerError;
use crate::events::{actions, reasons as event_reasons};
use crate::scope::VirtualMachineScope;
use crate::store::{add_finalizer, is_deleting, remove_finalizer};
use crds::conditions::{self, VM_RUNNING, reasons};
use crds::labels::VIRTUAL_MACHINE_FINALIZER;
use crds::{ConditionSeverity, MachineAddress, VmState};
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue while the backend provisions the VM.
pub const PROVISIONING_REQUEUE: Duration = Duration::from_secs(15);

/// Failure reason recorded for VMs in an unexpected state.
pub const UPDATE_ERROR: &str = "UpdateError";

pub(crate) async fn reconcile(scope: &mut VirtualMachineScope, ctx: &Context) -> Result<Action, ControllerError> {
    if is_deleting(&scope.object) {
        return reconcile_delete(scope, ctx).await;
    }
    reconcile_normal(scope, ctx).await
}

async fn reconcile_normal(scope: &mut VirtualMachineScope, ctx: &Context) -> Result<Action, ControllerError> {
    if scope.object.status.as_ref().is_some_and(|s| s.failure_reason.is_some()) {
        debug!(vm = %scope.name(), "Virtual machine has a terminal failure, waiting for a change");
        return Ok(Action::await_change());
    }

    if add_finalizer(&mut scope.object, VIRTUAL_MACHINE_FINALIZER) {
        scope.checkpoint(ctx.virtual_machines.as_ref()).await?;
    }

    let plan = MachinePlan::for_virtual_machine(scope.name(), &scope.object);
    let outcome = Pipeline::new(ctx.cloud.as_ref()).create(&plan).await;
    let vm = &mut scope.object;

    match outcome {
        Ok(remote) => {
            let status = vm.status_mut();
            let newly_ready = !status.ready;
            status.ready = true;
            status.vm_state = Some(VmState::Succeeded);
            status.addresses = remote
                .addresses
                .into_iter()
                .map(|a| MachineAddress { type_: a.type_, address: a.address })
                .collect();
            conditions::mark_true(vm, VM_RUNNING);
            if newly_ready {
                info!(vm = %plan.name, "Virtual machine is running");
                ctx.normal(&*vm, event_reasons::PROVISIONED, actions::RECONCILE, format!("Virtual machine {} is running", plan.name))
                    .await;
            }
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        Err(ProvisionError::InProgress { state, .. }) => {
            debug!(vm = %plan.name, %state, "Virtual machine still provisioning");
            let status = vm.status_mut();
            status.ready = false;
            status.vm_state = Some(state.clone());
            conditions::mark_false(
                vm,
                VM_RUNNING,
                reasons::VM_PROVISIONING,
                ConditionSeverity::Info,
                format!("virtual machine is {state}"),
            );
            Ok(Action::requeue(PROVISIONING_REQUEUE))
        }
        Err(ProvisionError::Failed(name)) => {
            let status = vm.status_mut();
            status.ready = false;
            status.vm_state = None;
            status.addresses.clear();
            let message = format!("virtual machine {name} failed to provision and was deleted, retrying");
            conditions::mark_false(vm, VM_RUNNING, reasons::VM_PROVISION_FAILED, ConditionSeverity::Warning, &message);
            ctx.warning(&*vm, event_reasons::VM_FAILED, actions::RECONCILE, message).await;
            Ok(Action::requeue(PROVISIONING_REQUEUE))
        }
        Err(ProvisionError::UnknownState { name, state }) => {
            warn!(vm = %name, %state, "Virtual machine reported an unexpected state");
            let message = format!("virtual machine {name} reported unexpected state {state}");
            let status = vm.status_mut();
            status.ready = false;
            status.vm_state = Some(VmState::Unknown(state));
            status.failure_reason = Some(UPDATE_ERROR.to_string());
            status.failure_message = Some(message.clone());
            conditions::mark_false(vm, VM_RUNNING, reasons::VM_STATE_UNKNOWN, ConditionSeverity::Error, &message);
            ctx.warning(&*vm, event_reasons::VM_FAILED, actions::RECONCILE, message).await;
            Ok(Action::await_change())
        }
        Err(ProvisionError::Controller(e)) => {
            vm.status_mut().ready = false;
            match exhaustion_reason(&e) {
                Some(reason) => {
                    conditions::mark_false(vm, VM_RUNNING, reason, ConditionSeverity::Error, e.to_string());
                    ctx.warning(&*vm, event_reasons::RESOURCE_EXHAUSTED, actions::RECONCILE, e.to_string()).await;
                }
                None if e.is_terminal() => {
                    conditions::mark_false(vm, VM_RUNNING, reasons::INVALID_SPEC, ConditionSeverity::Error, e.to_string());
                }
                None => {
                    conditions::mark_false(
                        vm,
                        VM_RUNNING,
                        reasons::VM_PROVISION_FAILED,
                        ConditionSeverity::Warning,
                        e.to_string(),
                    );
                }
            }
            Err(e)
        }
    }
}

async fn reconcile_delete(scope: &mut VirtualMachineScope, ctx: &Context) -> Result<Action, ControllerError> {
    let plan = MachinePlan::for_virtual_machine(scope.name(), &scope.object);
    let vm = &mut scope.object;
    vm.status_mut().ready = false;
    conditions::mark_false(vm, VM_RUNNING, reasons::DELETING, ConditionSeverity::Info, "deleting virtual machine");

    if let Err(e) = Pipeline::new(ctx.cloud.as_ref()).delete(&plan).await {
        conditions::mark_false(vm, VM_RUNNING, reasons::DELETION_FAILED, ConditionSeverity::Warning, e.to_string());
        return Err(e);
    }

    info!(vm = %plan.name, "Virtual machine resources deleted");
    ctx.normal(&*vm, event_reasons::DELETED, actions::DELETE, format!("Deleted virtual machine {}", plan.name))
        .await;
    remove_finalizer(vm, VIRTUAL_MACHINE_FINALIZER);
    Ok(Action::await_change())
}
