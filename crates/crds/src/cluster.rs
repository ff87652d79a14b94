//! FleetCluster CRD
//!
//! Cluster-scoped network, secret store and load balancer declarations for a
//! Cluster API workload cluster.

use crate::common::{ApiEndpoint, Image, SpecError};
use crate::conditions::{Condition, Conditioned, Phase};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.fleet.dev",
    version = "v1alpha1",
    kind = "FleetCluster",
    namespaced,
    status = "FleetClusterStatus",
    shortname = "fc",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FleetClusterSpec {
    /// Backend location (region) for all cluster resources
    pub location: String,

    /// Resource group holding the cluster's cloud resources
    pub resource_group: String,

    /// Virtual network declarations
    pub network_spec: NetworkSpec,

    /// Load balancer in front of the control plane (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<ClusterLoadBalancerSpec>,

    /// Set by the controller once the load balancer has an address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Virtual network and subnets of a cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Virtual network
    pub vnet: VnetSpec,

    /// Subnets inside the virtual network
    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,
}

/// Virtual network declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnetSpec {
    /// Virtual network name
    pub name: String,

    /// Address space (e.g., "10.0.0.0/16")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
}

/// Subnet declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Subnet name
    pub name: String,

    /// Address range (e.g., "10.0.1.0/24")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
}

/// Load balancer declaration embedded in a cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoadBalancerSpec {
    /// Replica image
    pub image: Image,

    /// Replica VM size
    pub vm_size: String,

    /// Base64 encoded SSH public key for replicas
    pub ssh_public_key: String,

    /// Desired replica count; required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct FleetClusterStatus {
    /// Infrastructure is ready for machines
    #[serde(default)]
    pub ready: bool,

    /// Derived lifecycle phase
    #[serde(default)]
    pub phase: Phase,

    /// Fine-grained conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Terminal failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl FleetCluster {
    /// Status, created on first access.
    pub fn status_mut(&mut self) -> &mut FleetClusterStatus {
        self.status.get_or_insert_with(Default::default)
    }

    /// Name of the child FleetLoadBalancer.
    pub fn load_balancer_name(&self) -> String {
        format!("{}-lb", self.metadata.name.as_deref().unwrap_or_default())
    }

    /// Name of the cluster's key vault.
    pub fn key_vault_name(&self) -> String {
        format!("{}-kv", self.metadata.name.as_deref().unwrap_or_default())
    }

    /// First declared subnet, used for machine NICs.
    pub fn default_subnet(&self) -> Result<&SubnetSpec, SpecError> {
        self.spec
            .network_spec
            .subnets
            .first()
            .ok_or(SpecError::Missing("networkSpec.subnets"))
    }
}

impl Conditioned for FleetCluster {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}
