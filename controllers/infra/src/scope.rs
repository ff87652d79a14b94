//! Per-reconcile scope with always-persist semantics.
//!
//! A [`Scope`] snapshots the object when the pass starts. Reconcilers mutate
//! `scope.object` freely; [`Scope::close`] writes the result back on every
//! exit path, success or error, so conditions recorded while failing are
//! never lost.

use crate::error::ControllerError;
use crate::store::{ObjectStore, object_key};
use crds::{FleetCluster, FleetLoadBalancer, FleetMachine, FleetVirtualMachine};
use kube::Resource;
use kube_runtime::controller::Action;
use serde::Serialize;
use tracing::{debug, warn};

/// Object under reconciliation plus its snapshot
pub struct Scope<K> {
    pub object: K,
    namespace: String,
    name: String,
    snapshot: serde_json::Value,
}

pub type ClusterScope = Scope<FleetCluster>;
pub type LoadBalancerScope = Scope<FleetLoadBalancer>;
pub type MachineScope = Scope<FleetMachine>;
pub type VirtualMachineScope = Scope<FleetVirtualMachine>;

impl<K> Scope<K>
where
    K: Resource + Clone + Serialize + Send + Sync + 'static,
{
    pub fn new(object: K) -> Result<Self, ControllerError> {
        let (namespace, name) = object_key(&object)?;
        let snapshot = serde_json::to_value(&object)?;
        Ok(Self { object, namespace, name, snapshot })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether the object differs from the last persisted snapshot.
    pub fn is_dirty(&self) -> Result<bool, ControllerError> {
        Ok(serde_json::to_value(&self.object)? != self.snapshot)
    }

    /// Persist now and continue with the stored object (e.g., after adding
    /// a finalizer that must exist before any cloud mutation).
    pub async fn checkpoint(&mut self, store: &dyn ObjectStore<K>) -> Result<(), ControllerError> {
        if !self.is_dirty()? {
            return Ok(());
        }
        let stored = store.patch(&self.object).await?;
        self.snapshot = serde_json::to_value(&stored)?;
        self.object = stored;
        Ok(())
    }

    /// Persist the object and return the reconcile result.
    ///
    /// A persist failure is reported unless the pass already failed, in
    /// which case the original error wins. An object that disappeared
    /// because its last finalizer was removed is not an error.
    pub async fn close(
        self,
        store: &dyn ObjectStore<K>,
        result: Result<Action, ControllerError>,
    ) -> Result<Action, ControllerError> {
        let persisted = match self.is_dirty() {
            Ok(false) => Ok(()),
            Ok(true) => match store.patch(&self.object).await {
                Ok(_) => Ok(()),
                Err(ControllerError::NotFound(_)) => {
                    debug!("{}/{} is gone, nothing to persist", self.namespace, self.name);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match (result, persisted) {
            (Ok(action), Ok(())) => Ok(action),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(persist_err)) => {
                warn!("Failed to persist {}/{} after error: {}", self.namespace, self.name, persist_err);
                Err(e)
            }
        }
    }
}
