//! Fleet infrastructure CRD definitions
//!
//! Kubernetes Custom Resource Definitions for the fleet infrastructure
//! controller, plus the condition and phase model shared by all of them.

pub mod cluster;
pub mod common;
pub mod conditions;
pub mod labels;
pub mod load_balancer;
pub mod machine;
pub mod owner_machine;
pub mod virtual_machine;

pub use cluster::*;
pub use common::*;
pub use conditions::{Condition, ConditionSeverity, ConditionStatus, Conditioned, Phase};
pub use load_balancer::*;
pub use machine::*;
pub use owner_machine::*;
pub use virtual_machine::*;
