//! Types shared by several fleet CRDs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a spec cannot be acted on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    /// A required field is missing
    #[error("{0} is required")]
    Missing(&'static str),

    /// A field has a value that cannot be used
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// OS image reference
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Image name in the backend gallery
    pub name: String,

    /// Image version; replicas are upgraded when this changes
    pub version: String,
}

/// Operating system disk settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    /// Disk size in GiB
    #[serde(default = "default_disk_size")]
    pub size_gb: u32,

    /// Backend disk type (e.g., "Standard", "Premium")
    #[serde(default = "default_disk_type")]
    pub disk_type: String,
}

fn default_disk_size() -> u32 {
    64
}

fn default_disk_type() -> String {
    "Standard".to_string()
}

impl Default for OsDisk {
    fn default() -> Self {
        Self {
            size_gb: default_disk_size(),
            disk_type: default_disk_type(),
        }
    }
}

/// Endpoint of a cluster's API server
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    /// Address or DNS name
    pub host: String,

    /// Port
    pub port: i32,
}

/// Provisioning state of a compute instance, as reported by the backend.
///
/// Values outside the known set are preserved in `Unknown` so they can be
/// surfaced to operators verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VmState {
    /// Instance is being created
    Creating,
    /// Instance settings are being applied
    Updating,
    /// Instance is provisioned
    Succeeded,
    /// Provisioning failed
    Failed,
    /// Instance is being removed
    Deleting,
    /// Instance is moving between hosts
    Migrating,
    /// Anything else the backend reported
    Unknown(String),
}

impl VmState {
    /// Whether the pipeline can make progress from this state.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for VmState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Creating" => Self::Creating,
            "Updating" => Self::Updating,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Deleting" => Self::Deleting,
            "Migrating" => Self::Migrating,
            _ => Self::Unknown(value),
        }
    }
}

impl From<&str> for VmState {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<VmState> for String {
    fn from(value: VmState) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => f.write_str("Creating"),
            Self::Updating => f.write_str("Updating"),
            Self::Succeeded => f.write_str("Succeeded"),
            Self::Failed => f.write_str("Failed"),
            Self::Deleting => f.write_str("Deleting"),
            Self::Migrating => f.write_str("Migrating"),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// Address reported for a provisioned instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    /// Address type (e.g., "InternalIP")
    #[serde(rename = "type")]
    pub type_: String,

    /// The address
    pub address: String,
}
