//! Reconciliation logic for the fleet infrastructure CRDs.
//!
//! - `cluster`: FleetCluster (network, key vault, load balancer child)
//! - `load_balancer`: FleetLoadBalancer (cloud load balancer, replica set)
//! - `machine`: FleetMachine (maps to a FleetVirtualMachine)
//! - `virtual_machine`: FleetVirtualMachine (provisioning pipeline)
//!
//! Every entry point loads the object into a [`Scope`], runs the kind's
//! reconcile body and persists the object through [`Scope::close`] whatever
//! the outcome.

pub mod cluster;
#[cfg(test)]
mod cluster_test;
pub mod load_balancer;
pub mod machine;
pub mod pipeline;
pub mod replicas;
pub mod virtual_machine;
#[cfg(test)]
mod virtual_machine_test;

use crate::context::Context;
use crate::error::ControllerError;
use crate::events::{actions, reasons as event_reasons};
use crate::scope::Scope;
use crate::store::ObjectStore;
use cloud_client::{CloudError, codes};
use crds::conditions::{self, READY, reasons};
use crds::{ConditionSeverity, Conditioned, FleetCluster, FleetLoadBalancer, FleetMachine, FleetVirtualMachine};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Requeue for objects that are fully reconciled.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue while waiting on addresses, replicas or child deletion.
pub const SHORT_REQUEUE: Duration = Duration::from_secs(20);

/// Requeue while waiting for a FleetVirtualMachine to go away.
pub const VM_DELETE_REQUEUE: Duration = Duration::from_secs(15);

/// Requeue after a write lost a resource version race.
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Condition reason for backend resource exhaustion, if `err` is one.
pub(crate) fn exhaustion_reason(err: &ControllerError) -> Option<&'static str> {
    match err.cloud_error().and_then(CloudError::code) {
        Some(codes::OUT_OF_MEMORY) => Some(reasons::OUT_OF_MEMORY),
        Some(codes::OUT_OF_CAPACITY) => Some(reasons::OUT_OF_CAPACITY),
        _ => None,
    }
}

/// Compare two specs by their serialized form.
pub(crate) fn same_spec<S: Serialize>(a: &S, b: &S) -> Result<bool, ControllerError> {
    Ok(serde_json::to_value(a)? == serde_json::to_value(b)?)
}

#[instrument(skip_all, fields(kind = "FleetCluster", name = %obj.name_any()))]
pub async fn reconcile_cluster(obj: Arc<FleetCluster>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let _timer = ctx.metrics.count_and_measure("FleetCluster");
    let mut scope = Scope::new(obj.as_ref().clone())?;
    let result = cluster::reconcile(&mut scope, &ctx).await;
    finish(scope, ctx.clusters.as_ref(), &ctx, result).await
}

#[instrument(skip_all, fields(kind = "FleetLoadBalancer", name = %obj.name_any()))]
pub async fn reconcile_load_balancer(
    obj: Arc<FleetLoadBalancer>,
    ctx: Arc<Context>,
) -> Result<Action, ControllerError> {
    let _timer = ctx.metrics.count_and_measure("FleetLoadBalancer");
    let mut scope = Scope::new(obj.as_ref().clone())?;
    let result = load_balancer::reconcile(&mut scope, &ctx).await;
    finish(scope, ctx.load_balancers.as_ref(), &ctx, result).await
}

#[instrument(skip_all, fields(kind = "FleetMachine", name = %obj.name_any()))]
pub async fn reconcile_machine(obj: Arc<FleetMachine>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let _timer = ctx.metrics.count_and_measure("FleetMachine");
    let mut scope = Scope::new(obj.as_ref().clone())?;
    let result = machine::reconcile(&mut scope, &ctx).await;
    finish(scope, ctx.machines.as_ref(), &ctx, result).await
}

#[instrument(skip_all, fields(kind = "FleetVirtualMachine", name = %obj.name_any()))]
pub async fn reconcile_virtual_machine(
    obj: Arc<FleetVirtualMachine>,
    ctx: Arc<Context>,
) -> Result<Action, ControllerError> {
    let _timer = ctx.metrics.count_and_measure("FleetVirtualMachine");
    let mut scope = Scope::new(obj.as_ref().clone())?;
    let result = virtual_machine::reconcile(&mut scope, &ctx).await;
    finish(scope, ctx.virtual_machines.as_ref(), &ctx, result).await
}

/// Record terminal errors on the object, persist it and settle retries.
async fn finish<K>(
    mut scope: Scope<K>,
    store: &dyn ObjectStore<K>,
    ctx: &Context,
    result: Result<Action, ControllerError>,
) -> Result<Action, ControllerError>
where
    K: Resource<DynamicType = ()> + Conditioned + Clone + Serialize + Send + Sync + 'static,
{
    if let Err(e) = &result {
        if e.is_terminal() {
            warn!(error = %e, "Spec cannot be reconciled");
            conditions::mark_false(&mut scope.object, READY, reasons::INVALID_SPEC, ConditionSeverity::Error, e.to_string());
            ctx.warning(&scope.object, event_reasons::INVALID_SPEC, actions::RECONCILE, e.to_string())
                .await;
        }
    }

    let key = retry_key::<K>(scope.namespace(), scope.name());
    let result = scope.close(store, result).await;
    if result.is_ok() {
        ctx.retries.reset(&key);
    }
    result
}

fn retry_key<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", K::kind(&()), namespace, name)
}

/// Requeue policy for failed passes.
///
/// Spec errors wait for the object to change and conflicts retry at once
/// against a fresh read. Everything else backs off per object.
pub fn error_policy<K>(obj: Arc<K>, error: &ControllerError, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    ctx.metrics.reconcile_failure(&kind, error.metric_label());

    if error.is_terminal() {
        debug!(kind = %kind, name = %obj.name_any(), "Terminal error, waiting for a change");
        return Action::await_change();
    }

    if let ControllerError::Conflict(what) = error {
        debug!(kind = %kind, name = %obj.name_any(), conflict = %what, "Stale write rejected, rereading");
        return Action::requeue(CONFLICT_REQUEUE);
    }

    let key = retry_key::<K>(&obj.namespace().unwrap_or_default(), &obj.name_any());
    let delay = ctx.retries.next_delay(&key);
    error!(kind = %kind, name = %obj.name_any(), error = %error, retry_in = ?delay, "Reconciliation failed");
    Action::requeue(delay)
}
