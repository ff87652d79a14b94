//! Main controller implementation.
//!
//! Wires the Kubernetes stores, cloud client and diagnostics into a shared
//! [`Context`] and runs one watcher per kind plus the metrics server.

use crate::backoff::RetryTracker;
use crate::bootstrap::SecretBootstrapData;
use crate::config::ControllerConfig;
use crate::context::Context;
use crate::error::ControllerError;
use crate::events::KubeEventSink;
use crate::metrics::{self, Metrics};
use crate::store::KubeStore;
use crate::watcher::Watcher;
use cloud_client::CloudClientTrait;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

const CONTROLLER_NAME: &str = "fleet-infra-controller";

/// Main controller for the fleet infrastructure CRDs.
pub struct Controller {
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    load_balancer_watcher: JoinHandle<Result<(), ControllerError>>,
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
    virtual_machine_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<std::io::Result<()>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: ControllerConfig, cloud: Arc<dyn CloudClientTrait>) -> Result<Self, ControllerError> {
        info!("Initializing fleet infrastructure controller");

        let client = Client::try_default().await?;
        let metrics = Metrics::new()?;

        let ctx = Arc::new(Context {
            clusters: Arc::new(KubeStore::new(client.clone())),
            load_balancers: Arc::new(KubeStore::new(client.clone())),
            machines: Arc::new(KubeStore::new(client.clone())),
            virtual_machines: Arc::new(KubeStore::new(client.clone())),
            owner_machines: Arc::new(KubeStore::new(client.clone())),
            cloud,
            bootstrap: Arc::new(SecretBootstrapData::new(client.clone())),
            events: Arc::new(KubeEventSink::new(client.clone(), CONTROLLER_NAME)),
            metrics: metrics.clone(),
            retries: RetryTracker::default(),
        });

        let watcher = Arc::new(Watcher::new(client, config.namespace.clone(), ctx));
        let concurrency = config.concurrency;

        let w = Arc::clone(&watcher);
        let cluster_watcher = tokio::spawn(async move { w.watch_clusters(concurrency.cluster).await });

        let w = Arc::clone(&watcher);
        let load_balancer_watcher = tokio::spawn(async move { w.watch_load_balancers(concurrency.load_balancer).await });

        let w = Arc::clone(&watcher);
        let machine_watcher = tokio::spawn(async move { w.watch_machines(concurrency.machine).await });

        let w = watcher;
        let virtual_machine_watcher =
            tokio::spawn(async move { w.watch_virtual_machines(concurrency.virtual_machine).await });

        let metrics_server = tokio::spawn(metrics::serve(config.metrics_addr, metrics));

        Ok(Self {
            cluster_watcher,
            load_balancer_watcher,
            machine_watcher,
            virtual_machine_watcher,
            metrics_server,
        })
    }

    /// Runs until any watcher or the metrics server stops.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Fleet infrastructure controller running");

        tokio::select! {
            result = &mut self.cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("FleetCluster watcher panicked: {}", e)))??;
            }
            result = &mut self.load_balancer_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("FleetLoadBalancer watcher panicked: {}", e)))??;
            }
            result = &mut self.machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("FleetMachine watcher panicked: {}", e)))??;
            }
            result = &mut self.virtual_machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("FleetVirtualMachine watcher panicked: {}", e)))??;
            }
            result = &mut self.metrics_server => {
                result
                    .map_err(|e| ControllerError::Watch(format!("metrics server panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("metrics server failed: {}", e)))?;
            }
        }

        info!("Fleet infrastructure controller stopped");
        Ok(())
    }
}
