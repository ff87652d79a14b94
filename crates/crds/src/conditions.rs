//! Condition and phase model
//!
//! Conditions are fine-grained status records attached to every fleet resource.
//! The helpers in this module upsert conditions by type, roll a set of tracked
//! conditions up into a single `Ready` condition, and derive the coarse phase
//! shown to humans.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ready summary condition.
pub const READY: &str = "Ready";
/// Infrastructure for the object has been provisioned.
pub const INFRASTRUCTURE_READY: &str = "InfrastructureReady";
/// Resource group, virtual network and key vault for a cluster exist.
pub const NETWORK_INFRASTRUCTURE_READY: &str = "NetworkInfrastructureReady";
/// The cluster's load balancer child reports ready with an address.
pub const LOAD_BALANCER_READY: &str = "LoadBalancerReady";
/// All load balancer replicas are ready and on the declared image.
pub const REPLICAS_READY: &str = "ReplicasReady";
/// Compute instance is running in the backend.
pub const VM_RUNNING: &str = "VMRunning";
/// Bootstrap payload for the machine is available.
pub const BOOTSTRAP_READY: &str = "BootstrapReady";

/// Well-known condition reasons.
pub mod reasons {
    /// Backend reported it is out of memory.
    pub const OUT_OF_MEMORY: &str = "OutOfMemory";
    /// Backend reported it is out of capacity.
    pub const OUT_OF_CAPACITY: &str = "OutOfCapacity";
    /// Generic transient reconciliation failure of a cluster.
    pub const CLUSTER_RECONCILIATION_FAILED: &str = "ClusterReconciliationFailed";
    /// Generic transient reconciliation failure of a load balancer.
    pub const LOAD_BALANCER_RECONCILIATION_FAILED: &str = "LoadBalancerReconciliationFailed";
    /// The object's spec cannot be acted on until it is edited.
    pub const INVALID_SPEC: &str = "InvalidSpec";
    /// Waiting for the load balancer child.
    pub const WAITING_FOR_LOAD_BALANCER: &str = "WaitingForLoadBalancer";
    /// Load balancer has no address yet.
    pub const WAITING_FOR_ADDRESS: &str = "WaitingForAddress";
    /// Bootstrap data secret is not available yet.
    pub const WAITING_FOR_BOOTSTRAP_DATA: &str = "WaitingForBootstrapData";
    /// Owner machine reference is not set yet.
    pub const WAITING_FOR_OWNER: &str = "WaitingForOwner";
    /// Cluster network infrastructure is not ready yet.
    pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE: &str = "WaitingForClusterInfrastructure";
    /// Compute instance is being provisioned.
    pub const VM_PROVISIONING: &str = "VMProvisioning";
    /// Compute instance provisioning failed in the backend.
    pub const VM_PROVISION_FAILED: &str = "VMProvisionFailed";
    /// Compute instance reported a state outside the known set.
    pub const VM_STATE_UNKNOWN: &str = "VMStateUnknown";
    /// Object is being torn down.
    pub const DELETING: &str = "Deleting";
    /// Teardown step failed and will be retried.
    pub const DELETION_FAILED: &str = "DeletionFailed";
    /// No replica is ready while some are desired.
    pub const NO_READY_REPLICAS: &str = "NoReadyReplicas";
    /// Waiting for replicas to become ready.
    pub const WAITING_FOR_REPLICAS: &str = "WaitingForReplicas";
    /// Adding a replica.
    pub const SCALING_UP: &str = "ScalingUp";
    /// Removing a replica.
    pub const SCALING_DOWN: &str = "ScalingDown";
    /// Replacing replicas that run an old image version.
    pub const UPGRADING: &str = "Upgrading";
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

/// Severity of a False condition.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// Needs operator attention.
    Error,
    /// Degraded but progressing.
    Warning,
    /// Informational, usually a transient step.
    Info,
}

impl ConditionSeverity {
    fn rank(self) -> u8 {
        match self {
            Self::Error => 3,
            Self::Warning => 2,
            Self::Info => 1,
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, VMRunning)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity, only set when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition status flipped
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// A True condition of the given type.
    pub fn true_condition(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::True,
            severity: None,
            reason: None,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    /// A False condition of the given type.
    pub fn false_condition(
        type_: impl Into<String>,
        reason: impl Into<String>,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::False,
            severity: Some(severity),
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_transition_time: Utc::now(),
        }
    }

    /// Whether the condition is True.
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Whether the condition is False.
    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}

/// Objects carrying a list of conditions.
pub trait Conditioned {
    /// Current conditions.
    fn conditions(&self) -> &[Condition];

    /// Mutable access, creating the status when it does not exist yet.
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// Looks up a condition by type.
pub fn get<'a, T: Conditioned + ?Sized>(obj: &'a T, type_: &str) -> Option<&'a Condition> {
    obj.conditions().iter().find(|c| c.type_ == type_)
}

/// True only when the condition exists and is True.
pub fn is_true<T: Conditioned + ?Sized>(obj: &T, type_: &str) -> bool {
    get(obj, type_).is_some_and(Condition::is_true)
}

/// True only when the condition exists and is False.
pub fn is_false<T: Conditioned + ?Sized>(obj: &T, type_: &str) -> bool {
    get(obj, type_).is_some_and(Condition::is_false)
}

/// Upserts a condition by type.
///
/// An existing condition with the same status and reason is left untouched.
/// When only the reason, message or severity changed the record is rewritten
/// but keeps its transition time.
pub fn set<T: Conditioned + ?Sized>(obj: &mut T, condition: Condition) {
    let conditions = obj.conditions_mut();
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status && existing.reason == condition.reason {
                return;
            }
            let last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = Condition {
                last_transition_time,
                ..condition
            };
        }
        None => conditions.push(condition),
    }
}

/// Sets a True condition of the given type.
pub fn mark_true<T: Conditioned + ?Sized>(obj: &mut T, type_: &str) {
    set(obj, Condition::true_condition(type_));
}

/// Sets a False condition of the given type.
pub fn mark_false<T: Conditioned + ?Sized>(
    obj: &mut T,
    type_: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) {
    set(obj, Condition::false_condition(type_, reason, severity, message));
}

/// Removes a condition by type.
pub fn delete<T: Conditioned + ?Sized>(obj: &mut T, type_: &str) {
    obj.conditions_mut().retain(|c| c.type_ != type_);
}

/// Rolls the tracked conditions into the `Ready` condition.
///
/// Missing tracked conditions count as False with Info severity. The worst
/// severity among False conditions wins; reason and message are copied from the
/// first False condition at that severity in `tracked` order. With
/// `step_counter` the message is replaced by an "N of M completed" counter.
pub fn summarize<T: Conditioned + ?Sized>(obj: &mut T, tracked: &[&str], step_counter: bool) {
    let mut worst: Option<(ConditionSeverity, String, String)> = None;
    let mut completed = 0usize;

    for type_ in tracked {
        let (severity, reason, message) = match get(obj, type_) {
            Some(c) if c.is_true() => {
                completed += 1;
                continue;
            }
            Some(c) => (
                c.severity.unwrap_or(ConditionSeverity::Info),
                c.reason.clone().unwrap_or_default(),
                c.message.clone().unwrap_or_default(),
            ),
            None => (
                ConditionSeverity::Info,
                format!("{type_}NotReported"),
                format!("{type_} has not been reported yet"),
            ),
        };
        let replace = worst
            .as_ref()
            .is_none_or(|(current, _, _)| severity.rank() > current.rank());
        if replace {
            worst = Some((severity, reason, message));
        }
    }

    match worst {
        None => mark_true(obj, READY),
        Some((severity, reason, message)) => {
            let message = if step_counter {
                format!("{completed} of {} completed", tracked.len())
            } else {
                message
            };
            mark_false(obj, READY, &reason, severity, message);
        }
    }
}

/// Coarse, human-facing lifecycle label.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Phase {
    /// Not reconciled yet
    #[default]
    Pending,
    /// Dependencies are being created
    Provisioning,
    /// Everything declared exists and is ready
    Provisioned,
    /// Teardown in progress
    Deleting,
    /// Terminal failure, needs operator attention
    Failed,
    /// Replacing replicas running an old image version
    Upgrading,
    /// Adding replicas
    ScalingUp,
    /// Removing replicas
    ScalingDown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Provisioning => "Provisioning",
            Self::Provisioned => "Provisioned",
            Self::Deleting => "Deleting",
            Self::Failed => "Failed",
            Self::Upgrading => "Upgrading",
            Self::ScalingUp => "ScalingUp",
            Self::ScalingDown => "ScalingDown",
        };
        f.write_str(s)
    }
}

/// Derives the phase from status facts.
///
/// Deletion beats failure, failure beats provisioning, provisioning beats
/// provisioned.
pub fn derive_phase(deleting: bool, failed: bool, infrastructure_ready: bool) -> Phase {
    if deleting {
        Phase::Deleting
    } else if failed {
        Phase::Failed
    } else if !infrastructure_ready {
        Phase::Provisioning
    } else {
        Phase::Provisioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Obj {
        conditions: Vec<Condition>,
    }

    impl Conditioned for Obj {
        fn conditions(&self) -> &[Condition] {
            &self.conditions
        }
        fn conditions_mut(&mut self) -> &mut Vec<Condition> {
            &mut self.conditions
        }
    }

    fn ready(obj: &Obj) -> &Condition {
        get(obj, READY).expect("Ready condition should be set")
    }

    #[test]
    fn test_mark_true_inserts_once() {
        let mut obj = Obj::default();
        mark_true(&mut obj, VM_RUNNING);
        mark_true(&mut obj, VM_RUNNING);
        assert_eq!(obj.conditions.len(), 1);
        assert!(is_true(&obj, VM_RUNNING));
    }

    #[test]
    fn test_same_status_and_reason_is_noop() {
        let mut obj = Obj::default();
        mark_false(&mut obj, VM_RUNNING, reasons::VM_PROVISIONING, ConditionSeverity::Info, "first");
        let before = get(&obj, VM_RUNNING).cloned().expect("set");
        mark_false(&mut obj, VM_RUNNING, reasons::VM_PROVISIONING, ConditionSeverity::Warning, "second");
        let after = get(&obj, VM_RUNNING).expect("set");
        assert_eq!(&before, after, "identical status and reason must not rewrite the condition");
    }

    #[test]
    fn test_reason_change_keeps_transition_time() {
        let mut obj = Obj::default();
        let mut original = Condition::false_condition(VM_RUNNING, "A", ConditionSeverity::Info, "a");
        original.last_transition_time = Utc::now() - chrono::Duration::minutes(10);
        let original_time = original.last_transition_time;
        obj.conditions.push(original);

        mark_false(&mut obj, VM_RUNNING, "B", ConditionSeverity::Warning, "b");
        let c = get(&obj, VM_RUNNING).expect("set");
        assert_eq!(c.reason.as_deref(), Some("B"));
        assert_eq!(c.severity, Some(ConditionSeverity::Warning));
        assert_eq!(c.last_transition_time, original_time);
    }

    #[test]
    fn test_status_flip_moves_transition_time() {
        let mut obj = Obj::default();
        let mut original = Condition::false_condition(VM_RUNNING, "A", ConditionSeverity::Info, "a");
        original.last_transition_time = Utc::now() - chrono::Duration::minutes(10);
        let original_time = original.last_transition_time;
        obj.conditions.push(original);

        mark_true(&mut obj, VM_RUNNING);
        let c = get(&obj, VM_RUNNING).expect("set");
        assert!(c.is_true());
        assert!(c.last_transition_time > original_time);
        assert_eq!(c.severity, None);
    }

    #[test]
    fn test_summarize_error_beats_warning_regardless_of_order() {
        for order in [["A", "B"], ["B", "A"]] {
            let mut obj = Obj::default();
            mark_false(&mut obj, "A", "ReasonA", ConditionSeverity::Warning, "message a");
            mark_false(&mut obj, "B", "ReasonB", ConditionSeverity::Error, "message b");
            summarize(&mut obj, &order, false);

            let r = ready(&obj);
            assert!(r.is_false());
            assert_eq!(r.severity, Some(ConditionSeverity::Error));
            assert_eq!(r.reason.as_deref(), Some("ReasonB"));
            assert_eq!(r.message.as_deref(), Some("message b"));
        }
    }

    #[test]
    fn test_summarize_first_at_worst_severity_wins() {
        let mut obj = Obj::default();
        mark_false(&mut obj, "A", "ReasonA", ConditionSeverity::Warning, "a");
        mark_false(&mut obj, "B", "ReasonB", ConditionSeverity::Warning, "b");
        summarize(&mut obj, &["B", "A"], false);
        assert_eq!(ready(&obj).reason.as_deref(), Some("ReasonB"));
    }

    #[test]
    fn test_summarize_all_true() {
        let mut obj = Obj::default();
        mark_true(&mut obj, "A");
        mark_true(&mut obj, "B");
        summarize(&mut obj, &["A", "B"], false);
        assert!(ready(&obj).is_true());
    }

    #[test]
    fn test_summarize_missing_is_never_true() {
        let mut obj = Obj::default();
        mark_true(&mut obj, "A");
        summarize(&mut obj, &["A", "B"], false);
        let r = ready(&obj);
        assert!(r.is_false());
        assert_eq!(r.severity, Some(ConditionSeverity::Info));
        assert_eq!(r.reason.as_deref(), Some("BNotReported"));
    }

    #[test]
    fn test_summarize_step_counter() {
        let mut obj = Obj::default();
        mark_true(&mut obj, "A");
        mark_false(&mut obj, "B", "Waiting", ConditionSeverity::Info, "waiting");
        summarize(&mut obj, &["A", "B", "C"], true);
        let r = ready(&obj);
        assert_eq!(r.message.as_deref(), Some("1 of 3 completed"));
        assert_eq!(r.reason.as_deref(), Some("Waiting"));
    }

    #[test]
    fn test_derive_phase_precedence() {
        assert_eq!(derive_phase(true, true, false), Phase::Deleting);
        assert_eq!(derive_phase(false, true, true), Phase::Failed);
        assert_eq!(derive_phase(false, false, false), Phase::Provisioning);
        assert_eq!(derive_phase(false, false, true), Phase::Provisioned);
    }
}
