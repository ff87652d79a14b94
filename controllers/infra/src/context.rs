//! Shared state handed to every reconcile.

use crate::backoff::RetryTracker;
use crate::bootstrap::BootstrapDataProvider;
use crate::events::EventSink;
use crate::metrics::Metrics;
use crate::store::ObjectStore;
use cloud_client::CloudClientTrait;
use crds::{FleetCluster, FleetLoadBalancer, FleetMachine, FleetVirtualMachine, Machine};
use kube::Resource;
use kube::runtime::events::EventType;
use std::sync::Arc;

/// Stores, cloud facade and diagnostics for the reconcilers
pub struct Context {
    pub clusters: Arc<dyn ObjectStore<FleetCluster>>,
    pub load_balancers: Arc<dyn ObjectStore<FleetLoadBalancer>>,
    pub machines: Arc<dyn ObjectStore<FleetMachine>>,
    pub virtual_machines: Arc<dyn ObjectStore<FleetVirtualMachine>>,
    pub owner_machines: Arc<dyn ObjectStore<Machine>>,
    pub cloud: Arc<dyn CloudClientTrait>,
    pub bootstrap: Arc<dyn BootstrapDataProvider>,
    pub events: Arc<dyn EventSink>,
    pub metrics: Metrics,
    pub retries: RetryTracker,
}

impl Context {
    /// Publish a Normal event about `obj`.
    pub async fn normal<K>(&self, obj: &K, reason: &str, action: &str, note: impl Into<String>)
    where
        K: Resource<DynamicType = ()>,
    {
        self.events
            .publish(&obj.object_ref(&()), EventType::Normal, reason, action, note.into())
            .await;
    }

    /// Publish a Warning event about `obj`.
    pub async fn warning<K>(&self, obj: &K, reason: &str, action: &str, note: impl Into<String>)
    where
        K: Resource<DynamicType = ()>,
    {
        self.events
            .publish(&obj.object_ref(&()), EventType::Warning, reason, action, note.into())
            .await;
    }
}
