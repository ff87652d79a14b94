//! FleetLoadBalancer CRD
//!
//! A horizontally scaled, rolling-upgradeable set of load balancer VM replicas
//! behind a cloud load balancer.

use crate::common::{Image, SpecError};
use crate::conditions::{Condition, Conditioned, Phase};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Replicas allowed above the desired count while upgrading.
pub const MAX_SURGE: i32 = 1;

/// Frontend port of the control plane load balancer.
pub const DEFAULT_FRONTEND_PORT: i32 = 6443;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.fleet.dev",
    version = "v1alpha1",
    kind = "FleetLoadBalancer",
    namespaced,
    status = "FleetLoadBalancerStatus",
    shortname = "flb",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".status.address"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FleetLoadBalancerSpec {
    /// Replica image
    pub image: Image,

    /// Replica VM size
    pub vm_size: String,

    /// Base64 encoded SSH public key for replicas
    pub ssh_public_key: String,

    /// Desired replica count; 0 is legal, absent is invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

impl FleetLoadBalancerSpec {
    /// Desired replica count, rejecting absent or negative values.
    pub fn desired_replicas(&self) -> Result<i32, SpecError> {
        match self.replicas {
            None => Err(SpecError::Missing("replicas")),
            Some(n) if n < 0 => Err(SpecError::Invalid {
                field: "replicas",
                reason: format!("must not be negative, got {n}"),
            }),
            Some(n) => Ok(n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct FleetLoadBalancerStatus {
    /// Lifecycle phase, including in-flight scale and upgrade operations
    #[serde(default)]
    pub phase: Phase,

    /// Live replicas
    #[serde(default)]
    pub replicas: i32,

    /// Replicas whose VM is running
    #[serde(default)]
    pub ready_replicas: i32,

    /// Replicas whose VM failed
    #[serde(default)]
    pub failed_replicas: i32,

    /// Frontend address of the cloud load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Frontend port of the cloud load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Label selector for replicas (for scale subresource consumers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Resource group the cloud load balancer was created in. Deletion
    /// falls back to it once the owning cluster is gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    /// Fine-grained conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl FleetLoadBalancer {
    /// Status, created on first access.
    pub fn status_mut(&mut self) -> &mut FleetLoadBalancerStatus {
        self.status.get_or_insert_with(Default::default)
    }

    /// Backend pool name replicas join.
    pub fn backend_pool_name(&self) -> String {
        format!("{}-backend-pool", self.metadata.name.as_deref().unwrap_or_default())
    }

    /// Current phase, `Pending` when never reconciled.
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}

impl Conditioned for FleetLoadBalancer {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}
