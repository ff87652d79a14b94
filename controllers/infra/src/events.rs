//! Kubernetes Event recording.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconcile.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Event reasons shown under REASON in `kubectl get events`
pub mod reasons {
    pub const PROVISIONING: &str = "Provisioning";
    pub const PROVISIONED: &str = "Provisioned";
    pub const VM_FAILED: &str = "VirtualMachineFailed";
    pub const SCALING_UP: &str = "ScalingUp";
    pub const SCALING_DOWN: &str = "ScalingDown";
    pub const UPGRADING: &str = "Upgrading";
    pub const INVALID_SPEC: &str = "InvalidSpec";
    pub const RESOURCE_EXHAUSTED: &str = "ResourceExhausted";
    pub const DELETING: &str = "Deleting";
    pub const DELETED: &str = "Deleted";
    pub const ORPHAN_DELETED: &str = "OrphanDeleted";
}

/// Event actions shown under ACTION
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const SCALE: &str = "Scale";
    pub const DELETE: &str = "Delete";
}

/// Sink for Kubernetes Events
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, reference: &ObjectReference, type_: EventType, reason: &str, action: &str, note: String);
}

/// Production sink wrapping `kube::runtime::events::Recorder`
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter { controller: controller_name.to_string(), instance: None };
        Self { recorder: Recorder::new(client, reporter) }
    }
}

#[async_trait::async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, reference: &ObjectReference, type_: EventType, reason: &str, action: &str, note: String) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, reference).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

#[cfg(test)]
pub use memory::MemoryEventSink;
