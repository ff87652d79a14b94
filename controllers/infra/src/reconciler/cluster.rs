//! FleetCluster reconciler
//!
//! Owns the cluster's resource group, virtual network and key vault, plus
//! the FleetLoadBalancer child fronting the control plane.
//!
//! Deletion runs in strict order, requeueing between steps:
//! 1. orphaned FleetMachines (owner Machine gone) are annotated and deleted;
//!    nothing else happens while any machine remains
//! 2. the FleetLoadBalancer child is deleted
//! 3. leftover load balancer replicas whose load balancer is gone are deleted
//! 4. key vault, virtual network and resource group are deleted
//! 5. the finalizer is removed

use super::machine::owner_machine_name;
use super::pipeline::deleted;
use super::{RESYNC_INTERVAL, SHORT_REQUEUE, exhaustion_reason};
use crate::context::Context;
use crate::error::ControllerError;
use crate::events::{actions, reasons as event_reasons};
use crate::scope::ClusterScope;
use crate::store::{add_finalizer, is_deleting, remove_finalizer};
use cloud_client::{CloudError, GroupSpec, KeyVaultSpec, SubnetSpec, VirtualNetworkSpec};
use crds::conditions::{self, LOAD_BALANCER_READY, NETWORK_INFRASTRUCTURE_READY, READY, reasons};
use crds::labels::{self, CLUSTER_FINALIZER};
use crds::load_balancer::DEFAULT_FRONTEND_PORT;
use crds::{
    ApiEndpoint, ClusterLoadBalancerSpec, ConditionSeverity, FleetCluster, FleetLoadBalancer, FleetLoadBalancerSpec,
    Phase,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub(crate) async fn reconcile(scope: &mut ClusterScope, ctx: &Context) -> Result<Action, ControllerError> {
    let deleting = is_deleting(&scope.object);
    let result = if deleting {
        reconcile_delete(scope, ctx).await
    } else {
        reconcile_normal(scope, ctx).await
    };

    let cluster = &mut scope.object;
    let tracked: &[&str] = if cluster.spec.load_balancer.is_some() {
        &[NETWORK_INFRASTRUCTURE_READY, LOAD_BALANCER_READY]
    } else {
        &[NETWORK_INFRASTRUCTURE_READY]
    };
    conditions::summarize(cluster, tracked, false);
    let ready = !deleting && conditions::is_true(cluster, READY);
    let failed = cluster.status.as_ref().is_some_and(|s| s.failure_reason.is_some());
    let status = cluster.status_mut();
    status.ready = ready;
    status.phase = conditions::derive_phase(deleting, failed, ready);
    result
}

fn correlation_id(cluster: &FleetCluster) -> Option<String> {
    cluster.metadata.annotations.as_ref()?.get(labels::CORRELATION_ID).cloned()
}

async fn reconcile_normal(scope: &mut ClusterScope, ctx: &Context) -> Result<Action, ControllerError> {
    let mut changed = add_finalizer(&mut scope.object, CLUSTER_FINALIZER);
    if correlation_id(&scope.object).is_none() {
        let id = uuid::Uuid::new_v4().to_string();
        debug!(cluster = %scope.name(), correlation_id = %id, "Assigning correlation id");
        scope
            .object
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(labels::CORRELATION_ID.to_string(), id);
        changed = true;
    }
    if changed {
        scope.checkpoint(ctx.clusters.as_ref()).await?;
    }

    let namespace = scope.namespace().to_string();
    let name = scope.name().to_string();

    if let Err(e) = reconcile_network(ctx, &scope.object).await {
        return match exhaustion_reason(&e) {
            Some(reason) => {
                warn!(cluster = %name, error = %e, "Backend is out of resources");
                conditions::mark_false(
                    &mut scope.object,
                    NETWORK_INFRASTRUCTURE_READY,
                    reason,
                    ConditionSeverity::Error,
                    e.to_string(),
                );
                ctx.warning(&scope.object, event_reasons::RESOURCE_EXHAUSTED, actions::RECONCILE, e.to_string())
                    .await;
                Ok(Action::requeue(RESYNC_INTERVAL))
            }
            None => {
                conditions::mark_false(
                    &mut scope.object,
                    NETWORK_INFRASTRUCTURE_READY,
                    reasons::CLUSTER_RECONCILIATION_FAILED,
                    ConditionSeverity::Error,
                    e.to_string(),
                );
                Err(e)
            }
        };
    }
    if !conditions::is_true(&scope.object, NETWORK_INFRASTRUCTURE_READY) {
        info!(cluster = %name, "Cluster network infrastructure ready");
        ctx.normal(&scope.object, event_reasons::PROVISIONED, actions::RECONCILE, "Network infrastructure ready")
            .await;
    }
    conditions::mark_true(&mut scope.object, NETWORK_INFRASTRUCTURE_READY);

    let Some(lb_spec) = scope.object.spec.load_balancer.clone() else {
        conditions::delete(&mut scope.object, LOAD_BALANCER_READY);
        return Ok(Action::requeue(RESYNC_INTERVAL));
    };

    let child = reconcile_load_balancer_child(ctx, &scope.object, &namespace, &lb_spec).await?;
    let address = child
        .status
        .as_ref()
        .filter(|_| conditions::is_true(&child, crds::conditions::INFRASTRUCTURE_READY))
        .and_then(|s| s.address.clone().filter(|a| !a.is_empty()).map(|a| (a, s.port)));

    match address {
        Some((host, port)) => {
            let endpoint = ApiEndpoint { host, port: port.unwrap_or(DEFAULT_FRONTEND_PORT) };
            if scope.object.spec.control_plane_endpoint.as_ref() != Some(&endpoint) {
                info!(cluster = %name, host = %endpoint.host, port = endpoint.port, "Setting control plane endpoint");
                scope.object.spec.control_plane_endpoint = Some(endpoint);
            }
            conditions::mark_true(&mut scope.object, LOAD_BALANCER_READY);
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        None => {
            debug!(cluster = %name, "Waiting for load balancer");
            conditions::mark_false(
                &mut scope.object,
                LOAD_BALANCER_READY,
                reasons::WAITING_FOR_LOAD_BALANCER,
                ConditionSeverity::Info,
                "waiting for load balancer to become ready with an address",
            );
            Ok(Action::requeue(SHORT_REQUEUE))
        }
    }
}

/// Whether a get found the resource; not-found is `false`.
fn found<T>(kind: &'static str, name: &str, result: Result<T, CloudError>) -> Result<bool, ControllerError> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(ControllerError::cloud("get", kind, name, e)),
    }
}

/// Create the resource group, virtual network and key vault when missing.
///
/// Existing resources are left as they are.
async fn reconcile_network(ctx: &Context, cluster: &FleetCluster) -> Result<(), ControllerError> {
    let spec = &cluster.spec;
    let group = &spec.resource_group;

    if !found("resource group", group, ctx.cloud.get_group(group).await)? {
        info!(resource_group = %group, "Creating resource group");
        let request = GroupSpec { name: group.clone(), location: spec.location.clone() };
        ctx.cloud
            .reconcile_group(&request)
            .await
            .map_err(|e| ControllerError::cloud("create", "resource group", group, e))?;
    }

    let vnet = &spec.network_spec.vnet;
    if !found("virtual network", &vnet.name, ctx.cloud.get_virtual_network(group, &vnet.name).await)? {
        info!(vnet = %vnet.name, "Creating virtual network");
        let request = VirtualNetworkSpec {
            name: vnet.name.clone(),
            resource_group: group.clone(),
            location: spec.location.clone(),
            cidr_block: vnet.cidr_block.clone(),
            subnets: spec
                .network_spec
                .subnets
                .iter()
                .map(|s| SubnetSpec { name: s.name.clone(), cidr_block: s.cidr_block.clone() })
                .collect(),
        };
        ctx.cloud
            .reconcile_virtual_network(&request)
            .await
            .map_err(|e| ControllerError::cloud("create", "virtual network", &vnet.name, e))?;
    }

    let vault = cluster.key_vault_name();
    if !found("key vault", &vault, ctx.cloud.get_key_vault(group, &vault).await)? {
        info!(key_vault = %vault, "Creating key vault");
        let request = KeyVaultSpec { name: vault.clone(), resource_group: group.clone(), location: spec.location.clone() };
        ctx.cloud
            .reconcile_key_vault(&request)
            .await
            .map_err(|e| ControllerError::cloud("create", "key vault", &vault, e))?;
    }
    Ok(())
}

/// Create or update the FleetLoadBalancer child.
///
/// Only image, SSH key, VM size and replicas are owned by the cluster.
async fn reconcile_load_balancer_child(
    ctx: &Context,
    cluster: &FleetCluster,
    namespace: &str,
    lb_spec: &ClusterLoadBalancerSpec,
) -> Result<FleetLoadBalancer, ControllerError> {
    let child_name = cluster.load_balancer_name();
    match ctx.load_balancers.get(namespace, &child_name).await? {
        None => {
            info!(load_balancer = %child_name, "Creating FleetLoadBalancer");
            let cluster_name = cluster.metadata.name.clone().unwrap_or_default();
            let mut annotations = BTreeMap::new();
            if let Some(id) = correlation_id(cluster) {
                annotations.insert(labels::CORRELATION_ID.to_string(), id);
            }
            let child = FleetLoadBalancer {
                metadata: ObjectMeta {
                    name: Some(child_name),
                    namespace: Some(namespace.to_string()),
                    labels: Some(labels::cluster_selector(&cluster_name)),
                    annotations: Some(annotations),
                    owner_references: cluster.controller_owner_ref(&()).map(|r| vec![r]),
                    ..Default::default()
                },
                spec: FleetLoadBalancerSpec {
                    image: lb_spec.image.clone(),
                    vm_size: lb_spec.vm_size.clone(),
                    ssh_public_key: lb_spec.ssh_public_key.clone(),
                    replicas: lb_spec.replicas,
                },
                status: None,
            };
            ctx.load_balancers.create(&child).await
        }
        Some(mut existing) => {
            let spec = &mut existing.spec;
            if spec.image == lb_spec.image
                && spec.vm_size == lb_spec.vm_size
                && spec.ssh_public_key == lb_spec.ssh_public_key
                && spec.replicas == lb_spec.replicas
            {
                return Ok(existing);
            }
            debug!(load_balancer = %child_name, "Updating FleetLoadBalancer");
            spec.image = lb_spec.image.clone();
            spec.vm_size = lb_spec.vm_size.clone();
            spec.ssh_public_key = lb_spec.ssh_public_key.clone();
            spec.replicas = lb_spec.replicas;
            ctx.load_balancers.update(&existing).await
        }
    }
}

async fn reconcile_delete(scope: &mut ClusterScope, ctx: &Context) -> Result<Action, ControllerError> {
    let namespace = scope.namespace().to_string();
    let name = scope.name().to_string();
    conditions::mark_false(
        &mut scope.object,
        NETWORK_INFRASTRUCTURE_READY,
        reasons::DELETING,
        ConditionSeverity::Info,
        "deleting cluster",
    );
    scope.object.status_mut().phase = Phase::Deleting;
    let selector = labels::cluster_selector(&name);
    let correlation = correlation_id(&scope.object);

    // Machines first.
    let machines = ctx.machines.list(&namespace, &selector).await?;
    if !machines.is_empty() {
        for mut machine in machines.into_iter().filter(|m| !is_deleting(m)) {
            let machine_name = machine.metadata.name.clone().unwrap_or_default();
            let owner = match owner_machine_name(&machine) {
                Some(owner) => ctx.owner_machines.get(&namespace, &owner).await?,
                None => None,
            };
            if owner.is_some() {
                continue;
            }
            info!(cluster = %name, machine = %machine_name, "Deleting orphaned machine");
            if let Some(id) = &correlation {
                machine
                    .metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert(labels::CORRELATION_ID.to_string(), id.clone());
                ctx.machines.update(&machine).await?;
            }
            ctx.machines.delete(&namespace, &machine_name).await?;
            ctx.normal(
                &scope.object,
                event_reasons::ORPHAN_DELETED,
                actions::DELETE,
                format!("Deleted orphaned machine {machine_name}"),
            )
            .await;
        }
        debug!(cluster = %name, "Waiting for machines to be deleted");
        return Ok(Action::requeue(SHORT_REQUEUE));
    }

    // Then the load balancer child.
    let child_name = scope.object.load_balancer_name();
    if let Some(child) = ctx.load_balancers.get(&namespace, &child_name).await? {
        if !is_deleting(&child) {
            info!(cluster = %name, load_balancer = %child_name, "Deleting load balancer");
            ctx.load_balancers.delete(&namespace, &child_name).await?;
        }
        return Ok(Action::requeue(SHORT_REQUEUE));
    }

    // Then any VM still labelled with the cluster.
    let leftovers = ctx.virtual_machines.list(&namespace, &selector).await?;
    if !leftovers.is_empty() {
        for vm in leftovers.iter().filter(|vm| !is_deleting(*vm)) {
            let lb_name = vm.metadata.labels.as_ref().and_then(|l| l.get(labels::LOAD_BALANCER_NAME));
            let Some(lb_name) = lb_name else { continue };
            if ctx.load_balancers.get(&namespace, lb_name).await?.is_some() {
                continue;
            }
            let vm_name = vm.metadata.name.as_deref().unwrap_or_default();
            info!(cluster = %name, replica = %vm_name, "Deleting orphaned load balancer replica");
            ctx.virtual_machines.delete(&namespace, vm_name).await?;
        }
        return Ok(Action::requeue(SHORT_REQUEUE));
    }

    // Cloud resources last.
    let group = scope.object.spec.resource_group.clone();
    let vault = scope.object.key_vault_name();
    let vnet = scope.object.spec.network_spec.vnet.name.clone();
    let result = async {
        deleted("key vault", &vault, ctx.cloud.delete_key_vault(&group, &vault).await)?;
        deleted("virtual network", &vnet, ctx.cloud.delete_virtual_network(&group, &vnet).await)?;
        deleted("resource group", &group, ctx.cloud.delete_group(&group).await)
    }
    .await;
    if let Err(e) = result {
        conditions::mark_false(
            &mut scope.object,
            NETWORK_INFRASTRUCTURE_READY,
            reasons::DELETION_FAILED,
            ConditionSeverity::Warning,
            e.to_string(),
        );
        return Err(e);
    }

    info!(cluster = %name, "Cluster infrastructure deleted");
    ctx.normal(&scope.object, event_reasons::DELETED, actions::DELETE, format!("Deleted cluster {name}"))
        .await;
    remove_finalizer(&mut scope.object, CLUSTER_FINALIZER);
    Ok(Action::await_change())
}
