//! Fleet Infrastructure Controller
//!
//! Reconciles the fleet CRDs against the cloud agent:
//! - FleetCluster: resource group, virtual network, key vault and the
//!   control plane load balancer
//! - FleetLoadBalancer: cloud load balancer plus a surge-limited replica set
//! - FleetMachine: Cluster API machine backed by a FleetVirtualMachine
//! - FleetVirtualMachine: availability set, NIC, disk and VM
//!
//! Configuration is read from environment variables; see [`config`].

mod backoff;
mod bootstrap;
mod config;
mod context;
mod controller;
mod error;
mod events;
mod metrics;
mod reconciler;
mod scope;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::{ControllerConfig, TokenSource};
use crate::error::ControllerError;
use cloud_client::{Authorizer, CloudClient, CloudClientTrait, StaticTokenAuthorizer, TokenFileAuthorizer};
use controller::Controller;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Fleet Infrastructure Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Cloud agent URL: {}", config.cloud_agent_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Metrics address: {}", config.metrics_addr);
    info!("  Concurrency: {:?}", config.concurrency);

    let authorizer: Box<dyn Authorizer> = match &config.token {
        TokenSource::Static(token) => Box::new(StaticTokenAuthorizer::new(token.clone())),
        TokenSource::File(path) => Box::new(TokenFileAuthorizer::new(path.clone())),
    };

    let cloud = CloudClient::connect(config.cloud_agent_url.clone(), authorizer.as_ref())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to authorize against the cloud agent");
            ControllerError::cloud("connect to", "cloud agent", &config.cloud_agent_url, e)
        })?;
    cloud
        .validate_connection()
        .await
        .map_err(|e| ControllerError::cloud("validate", "cloud agent", &config.cloud_agent_url, e))?;
    info!("Cloud agent connection validated");

    let controller = Controller::new(config, Arc::new(cloud)).await?;
    controller.run().await?;

    Ok(())
}
