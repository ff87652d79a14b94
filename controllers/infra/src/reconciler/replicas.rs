//! Replica planning for load balancers.
//!
//! Pure decision logic: given the live replicas, the desired count and the
//! declared image version, [`plan`] picks the single action for this pass.
//! The load balancer reconciler carries the action out.

use crds::conditions::{self, VM_RUNNING};
use crds::labels::IMAGE_VERSION;
use crds::load_balancer::MAX_SURGE;
use crds::{Condition, ConditionSeverity, FleetVirtualMachine};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::time::Duration;

/// Requeue while an upgrade or scale-up is in flight.
pub const IN_FLIGHT_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue while replicas become ready.
pub const CONVERGENCE_REQUEUE: Duration = Duration::from_secs(20);

/// What the planner needs to know about one replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaView {
    pub name: String,
    pub created: Option<Time>,
    /// Image version label the replica was created with
    pub image_version: Option<String>,
    pub ready: bool,
    /// Backend reports the VM as failed
    pub failed: bool,
    /// `VMRunning` condition when it is False with Error severity
    pub error_condition: Option<Condition>,
}

impl ReplicaView {
    pub fn from_virtual_machine(vm: &FleetVirtualMachine) -> Self {
        let error_condition = conditions::get(vm, VM_RUNNING)
            .filter(|c| c.is_false() && c.severity == Some(ConditionSeverity::Error))
            .cloned();
        Self {
            name: vm.metadata.name.clone().unwrap_or_default(),
            created: vm.metadata.creation_timestamp.clone(),
            image_version: vm.metadata.labels.as_ref().and_then(|l| l.get(IMAGE_VERSION)).cloned(),
            ready: vm.is_ready(),
            failed: vm.is_failed(),
            error_condition,
        }
    }

    /// True when the replica is not on `version`; unlabelled replicas count.
    pub fn is_outdated(&self, version: &str) -> bool {
        self.image_version.as_deref() != Some(version)
    }

    /// Created on `version` and still coming up: the outcome of an earlier
    /// scale-up or surge.
    pub fn is_in_flight(&self, version: &str) -> bool {
        !self.ready && !self.failed && !self.is_outdated(version)
    }
}

/// Aggregate replica counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Live replicas, ready or not
    pub total: i32,
    pub ready: i32,
    pub failed: i32,
}

impl Counts {
    /// Count `replicas`.
    pub fn of(replicas: &[ReplicaView]) -> Self {
        Self {
            total: replicas.len() as i32,
            ready: replicas.iter().filter(|r| r.ready).count() as i32,
            failed: replicas.iter().filter(|r| r.failed).count() as i32,
        }
    }
}

/// Action for one pass; the first matching rule wins.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// A replica reports an Error condition; do not scale.
    Blocked(Condition),
    /// A replica added by an earlier scale-up or surge is still coming up.
    WaitInFlight,
    /// Replicas are not ready and nothing is in flight.
    WaitForReady,
    /// Add one replica on the declared version.
    ScaleUp,
    /// Delete `victim`, picked by [`select_victim`].
    ScaleDown { victim: String },
    /// Add one replica on the declared version to replace an old one.
    Surge,
    /// Nothing to do until something changes.
    Converged,
}

impl Decision {
    /// Requeue for this decision; `None` falls back to the resync interval.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::WaitInFlight => Some(IN_FLIGHT_REQUEUE),
            Self::WaitForReady | Self::ScaleUp | Self::ScaleDown { .. } | Self::Surge => Some(CONVERGENCE_REQUEUE),
            Self::Blocked(_) | Self::Converged => None,
        }
    }
}

/// Planner output: the counts it saw and the action it picked.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub counts: Counts,
    pub decision: Decision,
}

/// Decide the next replica action.
///
/// Works from the live replicas alone. Whether an operation is in flight
/// is read off the replicas, never off a phase recorded by an earlier pass.
pub fn plan(replicas: &[ReplicaView], desired: i32, version: &str) -> Plan {
    let counts = Counts::of(replicas);

    if let Some(condition) = replicas.iter().find_map(|r| r.error_condition.clone()) {
        return Plan { counts, decision: Decision::Blocked(condition) };
    }

    let in_flight = replicas.iter().any(|r| r.is_in_flight(version));
    let decision = if counts.ready < counts.total && in_flight {
        Decision::WaitInFlight
    } else if counts.ready < counts.total && counts.total <= desired {
        Decision::WaitForReady
    } else if counts.total < desired {
        Decision::ScaleUp
    } else if counts.total > desired {
        match select_victim(replicas, version) {
            Some(victim) => Decision::ScaleDown { victim: victim.name.clone() },
            None => Decision::Converged,
        }
    } else if replicas.iter().any(|r| r.is_outdated(version)) && counts.total < desired + MAX_SURGE {
        Decision::Surge
    } else {
        Decision::Converged
    };

    Plan { counts, decision }
}

/// Replica to remove when scaling down.
///
/// Prefers a replica not on `version`, then the oldest, then the lowest name.
pub fn select_victim<'a>(replicas: &'a [ReplicaView], version: &str) -> Option<&'a ReplicaView> {
    replicas.iter().min_by(|a, b| {
        b.is_outdated(version)
            .cmp(&a.is_outdated(version))
            .then_with(|| a.created.cmp(&b.created))
            .then_with(|| a.name.cmp(&b.name))
    })
}
