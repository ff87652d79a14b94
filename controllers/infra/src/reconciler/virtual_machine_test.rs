//! Unit tests for the FleetVirtualMachine reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::events::reasons as event_reasons;
    use crate::reconciler::virtual_machine::{PROVISIONING_REQUEUE, UPDATE_ERROR};
    use crate::reconciler::{RESYNC_INTERVAL, error_policy};
    use crate::store::{ObjectStore, has_finalizer, is_deleting};
    use crate::test_utils::{NAMESPACE, RESOURCE_GROUP, TestEnv, virtual_machine};
    use cloud_client::codes;
    use crds::conditions::{self, READY, VM_RUNNING, reasons};
    use crds::labels::VIRTUAL_MACHINE_FINALIZER;
    use crds::{ConditionSeverity, VmState};
    use kube_runtime::controller::Action;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_provisions_and_reports_running() {
        let env = TestEnv::new();
        env.virtual_machines.insert(virtual_machine("web-0", Some("web-avset")));

        let action = env.reconcile_virtual_machine("web-0").await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));

        let vm = env.virtual_machine("web-0");
        assert!(has_finalizer(&vm, VIRTUAL_MACHINE_FINALIZER));
        assert!(vm.is_ready());
        assert!(conditions::is_true(&vm, VM_RUNNING));
        let status = vm.status.unwrap();
        assert_eq!(status.vm_state, Some(VmState::Succeeded));
        assert_eq!(status.addresses.len(), 1);
        assert!(env.cloud.virtual_machine(RESOURCE_GROUP, "web-0").is_some());

        // A second pass does not announce the VM again
        env.reconcile_virtual_machine("web-0").await.unwrap();
        let provisioned = env
            .events
            .reasons()
            .into_iter()
            .filter(|r| r == event_reasons::PROVISIONED)
            .count();
        assert_eq!(provisioned, 1);
    }

    #[tokio::test]
    async fn test_waits_while_backend_provisions() {
        let env = TestEnv::new();
        env.cloud.set_default_vm_state("Creating");
        env.virtual_machines.insert(virtual_machine("web-0", None));

        let action = env.reconcile_virtual_machine("web-0").await.unwrap();
        assert_eq!(action, Action::requeue(PROVISIONING_REQUEUE));

        let vm = env.virtual_machine("web-0");
        assert!(!vm.is_ready());
        let condition = conditions::get(&vm, VM_RUNNING).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(reasons::VM_PROVISIONING));
        assert_eq!(condition.severity, Some(ConditionSeverity::Info));

        env.cloud.set_vm_state("web-0", "Succeeded");
        env.reconcile_virtual_machine("web-0").await.unwrap();
        assert!(env.virtual_machine("web-0").is_ready());
    }

    #[tokio::test]
    async fn test_failed_vm_heals_on_next_pass() {
        let env = TestEnv::new();
        env.cloud.set_default_vm_state("Failed");
        env.virtual_machines.insert(virtual_machine("web-0", None));

        let action = env.reconcile_virtual_machine("web-0").await.unwrap();
        assert_eq!(action, Action::requeue(PROVISIONING_REQUEUE));
        let vm = env.virtual_machine("web-0");
        let condition = conditions::get(&vm, VM_RUNNING).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(reasons::VM_PROVISION_FAILED));
        assert_eq!(condition.severity, Some(ConditionSeverity::Warning));
        assert!(env.cloud.virtual_machine(RESOURCE_GROUP, "web-0").is_none());
        assert!(env.events.reasons().contains(&event_reasons::VM_FAILED.to_string()));

        env.cloud.set_default_vm_state("Succeeded");
        env.reconcile_virtual_machine("web-0").await.unwrap();
        let vm = env.virtual_machine("web-0");
        assert!(vm.is_ready());
        assert!(conditions::is_true(&vm, VM_RUNNING));
    }

    #[tokio::test]
    async fn test_unknown_state_is_terminal() {
        let env = TestEnv::new();
        env.cloud.set_default_vm_state("Hibernating");
        env.virtual_machines.insert(virtual_machine("web-0", None));

        let action = env.reconcile_virtual_machine("web-0").await.unwrap();
        assert_eq!(action, Action::await_change());

        let vm = env.virtual_machine("web-0");
        let status = vm.status.clone().unwrap();
        assert_eq!(status.failure_reason.as_deref(), Some(UPDATE_ERROR));
        assert_eq!(status.vm_state, Some(VmState::Unknown("Hibernating".to_string())));
        let condition = conditions::get(&vm, VM_RUNNING).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(reasons::VM_STATE_UNKNOWN));
        assert_eq!(condition.severity, Some(ConditionSeverity::Error));

        // Later passes leave the backend alone
        env.cloud.clear_calls();
        assert_eq!(env.reconcile_virtual_machine("web-0").await.unwrap(), Action::await_change());
        assert!(env.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_memory_is_persisted_with_error() {
        let env = TestEnv::new();
        env.cloud.inject_error("reconcile_virtual_machine", codes::OUT_OF_MEMORY, "host pool exhausted");
        env.virtual_machines.insert(virtual_machine("web-0", None));

        let err = env.reconcile_virtual_machine("web-0").await.unwrap_err();
        assert!(!err.is_terminal());

        let vm = env.virtual_machine("web-0");
        let condition = conditions::get(&vm, VM_RUNNING).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(reasons::OUT_OF_MEMORY));
        assert_eq!(condition.severity, Some(ConditionSeverity::Error));
        assert!(env.events.reasons().contains(&event_reasons::RESOURCE_EXHAUSTED.to_string()));

        let action = error_policy(Arc::new(vm), &err, env.ctx.clone());
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_invalid_ssh_key_waits_for_spec_change() {
        let env = TestEnv::new();
        let mut vm = virtual_machine("web-0", None);
        vm.spec.ssh_public_key = "garbage".to_string();
        env.virtual_machines.insert(vm);

        let err = env.reconcile_virtual_machine("web-0").await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
        assert!(env.cloud.mutating_calls().is_empty());

        let vm = env.virtual_machine("web-0");
        let ready = conditions::get(&vm, READY).unwrap();
        assert_eq!(ready.reason.as_deref(), Some(reasons::INVALID_SPEC));
        assert_eq!(ready.severity, Some(ConditionSeverity::Error));
        assert!(env.events.reasons().contains(&event_reasons::INVALID_SPEC.to_string()));

        assert_eq!(error_policy(Arc::new(vm), &err, env.ctx.clone()), Action::await_change());
    }

    #[tokio::test]
    async fn test_delete_tears_down_and_releases_finalizer() {
        let env = TestEnv::new();
        env.virtual_machines.insert(virtual_machine("web-0", Some("web-avset")));
        env.reconcile_virtual_machine("web-0").await.unwrap();

        env.virtual_machines.delete(NAMESPACE, "web-0").await.unwrap();
        assert!(is_deleting(&env.virtual_machine("web-0")));

        let action = env.reconcile_virtual_machine("web-0").await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(!env.virtual_machines.contains(NAMESPACE, "web-0"));
        assert!(env.cloud.virtual_machine(RESOURCE_GROUP, "web-0").is_none());
        assert!(env.cloud.network_interface(RESOURCE_GROUP, "web-0-nic").is_none());
        assert!(env.cloud.availability_set(RESOURCE_GROUP, "web-avset").is_none());
        assert!(env.events.reasons().contains(&event_reasons::DELETED.to_string()));
    }

    #[tokio::test]
    async fn test_failed_teardown_keeps_finalizer() {
        let env = TestEnv::new();
        env.virtual_machines.insert(virtual_machine("web-0", None));
        env.reconcile_virtual_machine("web-0").await.unwrap();
        env.virtual_machines.delete(NAMESPACE, "web-0").await.unwrap();
        env.cloud.inject_error("delete_disk", "InternalError", "disk locked");

        assert!(env.reconcile_virtual_machine("web-0").await.is_err());
        let vm = env.virtual_machine("web-0");
        assert!(has_finalizer(&vm, VIRTUAL_MACHINE_FINALIZER));
        assert_eq!(
            conditions::get(&vm, VM_RUNNING).unwrap().reason.as_deref(),
            Some(reasons::DELETION_FAILED)
        );

        env.cloud.clear_errors();
        env.reconcile_virtual_machine("web-0").await.unwrap();
        assert!(!env.virtual_machines.contains(NAMESPACE, "web-0"));
    }
}
