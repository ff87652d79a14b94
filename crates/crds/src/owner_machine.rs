//! Read-only view of the Cluster API `Machine` that owns a FleetMachine.
//!
//! Only the fields this controller consumes are modelled; unknown fields are
//! ignored on deserialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Owning cluster
    pub cluster_name: String,

    /// Bootstrap configuration reference
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Kubernetes version of the machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Secret holding the bootstrap payload, set once the bootstrap provider is done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}
