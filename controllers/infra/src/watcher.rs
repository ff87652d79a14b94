//! Kubernetes resource watchers.
//!
//! One `kube_runtime::Controller` per kind. The runtime serializes
//! reconciles of the same object, runs different objects concurrently up to
//! the configured limit and performs the requeues the reconcilers ask for.

use crate::context::Context;
use crate::error::ControllerError;
use crate::reconciler::{self, error_policy};
use crds::{FleetCluster, FleetLoadBalancer, FleetMachine, FleetVirtualMachine};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Quiet period before a burst of events triggers a reconcile.
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Drive `controller` until its stream ends.
async fn watch_resource<K, F, Fut>(
    controller: Controller<K>,
    ctx: Arc<Context>,
    reconcile: F,
    concurrency: u16,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: FnMut(Arc<K>, Arc<Context>) -> Fut,
    Fut: Future<Output = Result<Action, ControllerError>> + Send + 'static,
{
    info!("Starting {} watcher (concurrency {})", resource_name, concurrency);

    let config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(concurrency);

    controller
        .with_config(config)
        .shutdown_on_signal()
        .run(reconcile, error_policy::<K>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj.name),
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    info!("{} watcher stopped", resource_name);
    Ok(())
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Watches the fleet CRDs.
pub struct Watcher {
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
}

impl Watcher {
    pub fn new(client: Client, namespace: Option<String>, ctx: Arc<Context>) -> Self {
        Self { client, namespace, ctx }
    }

    /// FleetClusters, also woken by their load balancer child.
    pub async fn watch_clusters(&self, concurrency: u16) -> Result<(), ControllerError> {
        let ns = self.namespace.as_deref();
        let controller = Controller::new(api::<FleetCluster>(&self.client, ns), watcher::Config::default())
            .owns(api::<FleetLoadBalancer>(&self.client, ns), watcher::Config::default());
        watch_resource(controller, self.ctx.clone(), reconciler::reconcile_cluster, concurrency, "FleetCluster").await
    }

    /// FleetLoadBalancers, also woken by their replicas.
    pub async fn watch_load_balancers(&self, concurrency: u16) -> Result<(), ControllerError> {
        let ns = self.namespace.as_deref();
        let controller = Controller::new(api::<FleetLoadBalancer>(&self.client, ns), watcher::Config::default())
            .owns(api::<FleetVirtualMachine>(&self.client, ns), watcher::Config::default());
        watch_resource(
            controller,
            self.ctx.clone(),
            reconciler::reconcile_load_balancer,
            concurrency,
            "FleetLoadBalancer",
        )
        .await
    }

    /// FleetMachines, also woken by their virtual machine.
    pub async fn watch_machines(&self, concurrency: u16) -> Result<(), ControllerError> {
        let ns = self.namespace.as_deref();
        let controller = Controller::new(api::<FleetMachine>(&self.client, ns), watcher::Config::default())
            .owns(api::<FleetVirtualMachine>(&self.client, ns), watcher::Config::default());
        watch_resource(controller, self.ctx.clone(), reconciler::reconcile_machine, concurrency, "FleetMachine").await
    }

    pub async fn watch_virtual_machines(&self, concurrency: u16) -> Result<(), ControllerError> {
        let ns = self.namespace.as_deref();
        let controller = Controller::new(api::<FleetVirtualMachine>(&self.client, ns), watcher::Config::default());
        watch_resource(
            controller,
            self.ctx.clone(),
            reconciler::reconcile_virtual_machine,
            concurrency,
            "FleetVirtualMachine",
        )
        .await
    }
}
