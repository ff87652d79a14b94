//! FleetLoadBalancer reconciler
//!
//! Keeps the cloud load balancer in place, discovers its address and
//! converges the replica set one step per pass (see [`super::replicas`]).

use super::pipeline::{decode_ssh_key, deleted};
use super::replicas::{self, Counts, Decision, ReplicaView};
use super::{RESYNC_INTERVAL, SHORT_REQUEUE, exhaustion_reason};
use crate::context::Context;
use crate::error::ControllerError;
use crate::events::{actions, reasons as event_reasons};
use crate::scope::LoadBalancerScope;
use crate::store::{add_finalizer, is_deleting, remove_finalizer};
use cloud_client::{LoadBalancer, LoadBalancerSpec};
use crds::conditions::{self, INFRASTRUCTURE_READY, NETWORK_INFRASTRUCTURE_READY, REPLICAS_READY, reasons};
use crds::labels::{self, LOAD_BALANCER_FINALIZER};
use crds::load_balancer::DEFAULT_FRONTEND_PORT;
use crds::{
    ConditionSeverity, FleetCluster, FleetLoadBalancer, FleetVirtualMachine, FleetVirtualMachineSpec, OsDisk, Phase,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const TRACKED: &[&str] = &[INFRASTRUCTURE_READY, REPLICAS_READY];

pub(crate) async fn reconcile(scope: &mut LoadBalancerScope, ctx: &Context) -> Result<Action, ControllerError> {
    let result = if is_deleting(&scope.object) {
        reconcile_delete(scope, ctx).await
    } else {
        reconcile_normal(scope, ctx).await
    };
    conditions::summarize(&mut scope.object, TRACKED, false);
    result
}

/// Availability set shared by the replicas of one load balancer.
pub fn availability_set_name(load_balancer: &str) -> String {
    format!("{load_balancer}-avset")
}

/// Owning cluster, from the cluster label.
async fn owner_cluster(
    ctx: &Context,
    lb: &FleetLoadBalancer,
    namespace: &str,
) -> Result<Option<FleetCluster>, ControllerError> {
    let cluster_name = lb
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::CLUSTER_NAME))
        .ok_or_else(|| {
            ControllerError::Validation(format!("load balancer has no {} label", labels::CLUSTER_NAME))
        })?;
    ctx.clusters.get(namespace, cluster_name).await
}

async fn reconcile_normal(scope: &mut LoadBalancerScope, ctx: &Context) -> Result<Action, ControllerError> {
    // Spec errors stop the pass before anything is created.
    let desired = scope.object.spec.desired_replicas()?;
    decode_ssh_key(&scope.object.spec.ssh_public_key)?;

    if add_finalizer(&mut scope.object, LOAD_BALANCER_FINALIZER) {
        scope.checkpoint(ctx.load_balancers.as_ref()).await?;
    }

    let namespace = scope.namespace().to_string();
    let name = scope.name().to_string();

    let cluster = owner_cluster(ctx, &scope.object, &namespace).await?;
    let Some(cluster) = cluster.filter(|c| conditions::is_true(c, NETWORK_INFRASTRUCTURE_READY)) else {
        debug!(load_balancer = %name, "Cluster network infrastructure not ready");
        conditions::mark_false(
            &mut scope.object,
            INFRASTRUCTURE_READY,
            reasons::WAITING_FOR_CLUSTER_INFRASTRUCTURE,
            ConditionSeverity::Info,
            "waiting for cluster network infrastructure",
        );
        return Ok(Action::requeue(SHORT_REQUEUE));
    };

    let remote = match ensure_cloud_load_balancer(ctx, &scope.object, &cluster, &name).await {
        Ok(remote) => remote,
        Err(e) => {
            let reason = exhaustion_reason(&e).unwrap_or(reasons::LOAD_BALANCER_RECONCILIATION_FAILED);
            conditions::mark_false(&mut scope.object, INFRASTRUCTURE_READY, reason, ConditionSeverity::Error, e.to_string());
            return Err(e);
        }
    };

    let selector = labels::load_balancer_selector(&name);
    {
        let status = scope.object.status_mut();
        status.selector = Some(labels::selector_string(&selector));
        status.resource_group = Some(cluster.spec.resource_group.clone());
        if let Some(address) = remote.as_ref().and_then(|lb| lb.frontend_ip.clone()) {
            status.address = Some(address);
            status.port = remote.as_ref().map(|lb| lb.frontend_port);
        }
    }

    let live: Vec<FleetVirtualMachine> = ctx
        .virtual_machines
        .list(&namespace, &selector)
        .await?
        .into_iter()
        .filter(|vm| !is_deleting(vm))
        .collect();
    let views: Vec<ReplicaView> = live.iter().map(ReplicaView::from_virtual_machine).collect();
    let version = scope.object.spec.image.version.clone();
    let plan = replicas::plan(&views, desired, &version);
    debug!(load_balancer = %name, desired, counts = ?plan.counts, decision = ?plan.decision, "Replica plan");

    let lb = &mut scope.object;
    set_counts(lb, plan.counts);
    let phase = match &plan.decision {
        Decision::Blocked(condition) => {
            conditions::mark_false(
                lb,
                REPLICAS_READY,
                condition.reason.as_deref().unwrap_or(reasons::VM_PROVISION_FAILED),
                ConditionSeverity::Error,
                condition.message.clone().unwrap_or_default(),
            );
            Phase::Failed
        }
        Decision::WaitInFlight => {
            mark_waiting(lb, plan.counts, desired, reasons::WAITING_FOR_REPLICAS);
            lb.phase()
        }
        Decision::WaitForReady => {
            mark_waiting(lb, plan.counts, desired, reasons::WAITING_FOR_REPLICAS);
            Phase::Provisioning
        }
        Decision::ScaleUp | Decision::Surge => {
            let upgrading = plan.decision == Decision::Surge;
            let replica = replica_for(lb, &cluster, &namespace, &name)?;
            let replica_name = replica.metadata.name.clone().unwrap_or_default();
            ctx.virtual_machines.create(&replica).await?;
            set_counts(lb, Counts { total: plan.counts.total + 1, ..plan.counts });
            let (reason, event, note) = if upgrading {
                (reasons::UPGRADING, event_reasons::UPGRADING, format!("Created replica {replica_name} on image {version}"))
            } else {
                (reasons::SCALING_UP, event_reasons::SCALING_UP, format!("Created replica {replica_name}"))
            };
            info!(load_balancer = %name, replica = %replica_name, upgrading, "Adding load balancer replica");
            mark_waiting(lb, plan.counts, desired, reason);
            ctx.normal(&*lb, event, actions::SCALE, note).await;
            if upgrading { Phase::Upgrading } else { Phase::ScalingUp }
        }
        Decision::ScaleDown { victim } => {
            info!(load_balancer = %name, replica = %victim, "Removing load balancer replica");
            ctx.virtual_machines.delete(&namespace, victim).await?;
            set_counts(lb, Counts { total: plan.counts.total - 1, ..plan.counts });
            mark_waiting(lb, plan.counts, desired, reasons::SCALING_DOWN);
            ctx.normal(&*lb, event_reasons::SCALING_DOWN, actions::SCALE, format!("Deleted replica {victim}"))
                .await;
            Phase::ScalingDown
        }
        Decision::Converged => {
            conditions::mark_true(lb, REPLICAS_READY);
            Phase::Provisioned
        }
    };

    let has_address = lb.status.as_ref().is_some_and(|s| s.address.is_some());
    if !has_address {
        conditions::mark_false(
            lb,
            INFRASTRUCTURE_READY,
            reasons::WAITING_FOR_ADDRESS,
            ConditionSeverity::Info,
            "load balancer has no address yet",
        );
    } else if conditions::is_true(lb, REPLICAS_READY) {
        conditions::mark_true(lb, INFRASTRUCTURE_READY);
    } else {
        conditions::mark_false(
            lb,
            INFRASTRUCTURE_READY,
            reasons::WAITING_FOR_REPLICAS,
            ConditionSeverity::Info,
            "replicas are not ready",
        );
    }
    lb.status_mut().phase = match phase {
        Phase::Provisioned if !has_address => Phase::Provisioning,
        phase => phase,
    };

    let requeue = match plan.decision {
        Decision::Blocked(_) => Some(SHORT_REQUEUE),
        ref decision => decision.requeue_after(),
    };
    Ok(match (requeue, has_address) {
        (Some(after), true) => Action::requeue(after),
        (Some(after), false) => Action::requeue(after.min(SHORT_REQUEUE)),
        (None, false) => Action::requeue(SHORT_REQUEUE),
        (None, true) => Action::requeue(RESYNC_INTERVAL),
    })
}

/// Create the cloud load balancer when missing or drifted, returning what
/// the backend reports.
async fn ensure_cloud_load_balancer(
    ctx: &Context,
    lb: &FleetLoadBalancer,
    cluster: &FleetCluster,
    name: &str,
) -> Result<Option<LoadBalancer>, ControllerError> {
    let spec = LoadBalancerSpec {
        name: name.to_string(),
        resource_group: cluster.spec.resource_group.clone(),
        location: cluster.spec.location.clone(),
        frontend_port: DEFAULT_FRONTEND_PORT,
        backend_pool_name: lb.backend_pool_name(),
    };

    match ctx.cloud.get_load_balancer(&spec.resource_group, name).await {
        Ok(existing) if existing.frontend_port == spec.frontend_port && existing.backend_pool_name == spec.backend_pool_name => {
            return Ok(Some(existing));
        }
        Ok(_) => info!(load_balancer = %name, "Updating cloud load balancer"),
        Err(e) if e.is_not_found() => info!(load_balancer = %name, "Creating cloud load balancer"),
        Err(e) => return Err(ControllerError::cloud("get", "load balancer", name, e)),
    }

    ctx.cloud
        .reconcile_load_balancer(&spec)
        .await
        .map_err(|e| ControllerError::cloud("reconcile", "load balancer", name, e))?;

    // Address discovery is best effort.
    match ctx.cloud.get_load_balancer(&spec.resource_group, name).await {
        Ok(remote) => Ok(Some(remote)),
        Err(e) => {
            debug!(load_balancer = %name, error = %e, "Load balancer not readable yet");
            Ok(None)
        }
    }
}

fn set_counts(lb: &mut FleetLoadBalancer, counts: Counts) {
    let status = lb.status_mut();
    status.replicas = counts.total;
    status.ready_replicas = counts.ready;
    status.failed_replicas = counts.failed;
}

/// Mark replicas not ready while converging.
///
/// With replicas desired but none ready the condition escalates to
/// `NoReadyReplicas`; a desired count of zero never does.
fn mark_waiting(lb: &mut FleetLoadBalancer, counts: Counts, desired: i32, reason: &str) {
    let message = format!("{} of {} replicas ready, {} desired", counts.ready, counts.total, desired);
    if desired > 0 && counts.ready == 0 {
        conditions::mark_false(lb, REPLICAS_READY, reasons::NO_READY_REPLICAS, ConditionSeverity::Warning, message);
    } else {
        conditions::mark_false(lb, REPLICAS_READY, reason, ConditionSeverity::Info, message);
    }
}

/// A new replica on the declared image.
pub fn replica_for(
    lb: &FleetLoadBalancer,
    cluster: &FleetCluster,
    namespace: &str,
    name: &str,
) -> Result<FleetVirtualMachine, ControllerError> {
    let subnet = cluster.default_subnet()?;
    let cluster_name = cluster.metadata.name.clone().unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let replica_name = format!("{}-{}", name, &suffix[..8]);

    let mut replica_labels = labels::load_balancer_selector(name);
    replica_labels.extend([
        (labels::CLUSTER_NAME.to_string(), cluster_name.clone()),
        (labels::MACHINE_ROLE.to_string(), labels::ROLE_LOAD_BALANCER.to_string()),
        (labels::IMAGE_VERSION.to_string(), lb.spec.image.version.clone()),
    ]);
    let annotations = cluster
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(labels::CORRELATION_ID))
        .map(|id| BTreeMap::from([(labels::CORRELATION_ID.to_string(), id.clone())]));

    Ok(FleetVirtualMachine {
        metadata: ObjectMeta {
            name: Some(replica_name),
            namespace: Some(namespace.to_string()),
            labels: Some(replica_labels),
            annotations,
            owner_references: lb.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: FleetVirtualMachineSpec {
            vm_size: lb.spec.vm_size.clone(),
            image: lb.spec.image.clone(),
            os_disk: OsDisk::default(),
            location: cluster.spec.location.clone(),
            availability_zone: None,
            availability_set: Some(availability_set_name(name)),
            resource_group: cluster.spec.resource_group.clone(),
            cluster_name,
            vnet_name: cluster.spec.network_spec.vnet.name.clone(),
            subnet_name: subnet.name.clone(),
            ssh_public_key: lb.spec.ssh_public_key.clone(),
            bootstrap_data: None,
            backend_pool_names: vec![lb.backend_pool_name()],
        },
        status: None,
    })
}

async fn reconcile_delete(scope: &mut LoadBalancerScope, ctx: &Context) -> Result<Action, ControllerError> {
    let namespace = scope.namespace().to_string();
    let name = scope.name().to_string();
    let lb = &mut scope.object;
    lb.status_mut().phase = Phase::Deleting;
    conditions::mark_false(lb, INFRASTRUCTURE_READY, reasons::DELETING, ConditionSeverity::Info, "deleting load balancer");

    let replicas = ctx.virtual_machines.list(&namespace, &labels::load_balancer_selector(&name)).await?;
    if !replicas.is_empty() {
        for replica in replicas.iter().filter(|r| !is_deleting(*r)) {
            let replica_name = replica.metadata.name.as_deref().unwrap_or_default();
            info!(load_balancer = %name, replica = %replica_name, "Deleting load balancer replica");
            ctx.virtual_machines.delete(&namespace, replica_name).await?;
        }
        set_counts(lb, Counts::of(&replicas.iter().map(ReplicaView::from_virtual_machine).collect::<Vec<_>>()));
        return Ok(Action::requeue(SHORT_REQUEUE));
    }
    set_counts(lb, Counts::default());

    // A failed cluster lookup keeps the finalizer.
    let cluster = match owner_cluster(ctx, lb, &namespace).await {
        Ok(cluster) => cluster,
        Err(ControllerError::Validation(msg)) => {
            warn!(load_balancer = %name, error = %msg, "Cannot resolve owning cluster");
            None
        }
        Err(e) => return Err(e),
    };
    let resource_group = match cluster {
        Some(cluster) => Some(cluster.spec.resource_group),
        None => lb.status.as_ref().and_then(|s| s.resource_group.clone()),
    };
    match resource_group {
        Some(resource_group) => {
            let result = ctx.cloud.delete_load_balancer(&resource_group, &name).await;
            if let Err(e) = deleted("load balancer", &name, result) {
                conditions::mark_false(lb, INFRASTRUCTURE_READY, reasons::DELETION_FAILED, ConditionSeverity::Warning, e.to_string());
                return Err(e);
            }
        }
        None => warn!(load_balancer = %name, "No resource group recorded, no cloud load balancer to delete"),
    }

    info!(load_balancer = %name, "Load balancer deleted");
    ctx.normal(&*lb, event_reasons::DELETED, actions::DELETE, format!("Deleted load balancer {name}"))
        .await;
    remove_finalizer(lb, LOAD_BALANCER_FINALIZER);
    Ok(Action::await_change())
}
