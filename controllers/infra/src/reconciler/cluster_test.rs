//! Unit tests for the FleetCluster reconciler

#[cfg(test)]
mod tests {
    use crate::events::reasons as event_reasons;
    use crate::reconciler::{RESYNC_INTERVAL, SHORT_REQUEUE};
    use crate::store::{ObjectStore, has_finalizer, is_deleting};
    use crate::test_utils::{
        NAMESPACE, RESOURCE_GROUP, TestEnv, cluster, correlation_annotation, machine, owner_machine, virtual_machine,
    };
    use cloud_client::codes;
    use crds::conditions::{self, LOAD_BALANCER_READY, NETWORK_INFRASTRUCTURE_READY, READY, reasons};
    use crds::labels::{self, CLUSTER_FINALIZER, MACHINE_FINALIZER};
    use crds::{ApiEndpoint, ConditionSeverity, FleetCluster, Phase};
    use kube::Resource;
    use kube_runtime::controller::Action;

    fn reason(cluster: &FleetCluster, type_: &str) -> Option<String> {
        conditions::get(cluster, type_).and_then(|c| c.reason.clone())
    }

    /// Drive cluster, load balancer and replica passes until the control
    /// plane endpoint is published.
    async fn provision(env: &TestEnv) {
        for _ in 0..6 {
            env.reconcile_cluster("c1").await.unwrap();
            if env.load_balancers.contains(NAMESPACE, "c1-lb") {
                env.reconcile_load_balancer("c1-lb").await.unwrap();
                env.reconcile_virtual_machines().await;
            }
        }
        env.reconcile_cluster("c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_provisions_network_infrastructure() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", None));

        let action = env.reconcile_cluster("c1").await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));

        let c = env.cluster("c1");
        assert!(has_finalizer(&c, CLUSTER_FINALIZER));
        assert!(correlation_annotation(&c).is_some());
        assert!(env.cloud.has_group(RESOURCE_GROUP));
        assert!(env.cloud.has_virtual_network(RESOURCE_GROUP, "c1-vnet"));
        assert!(env.cloud.has_key_vault(RESOURCE_GROUP, "c1-kv"));
        assert!(conditions::is_true(&c, NETWORK_INFRASTRUCTURE_READY));
        assert!(conditions::get(&c, LOAD_BALANCER_READY).is_none());
        assert!(conditions::is_true(&c, READY));
        let status = c.status.unwrap();
        assert!(status.ready);
        assert_eq!(status.phase, Phase::Provisioned);
        assert!(env.events.reasons().contains(&event_reasons::PROVISIONED.to_string()));
        assert!(!env.load_balancers.contains(NAMESPACE, "c1-lb"));
    }

    #[tokio::test]
    async fn test_existing_resources_are_not_recreated() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", None));
        env.reconcile_cluster("c1").await.unwrap();
        let id = correlation_annotation(&env.cluster("c1"));
        env.cloud.clear_calls();

        env.reconcile_cluster("c1").await.unwrap();
        assert!(env.cloud.mutating_calls().is_empty(), "{:?}", env.cloud.mutating_calls());
        assert_eq!(correlation_annotation(&env.cluster("c1")), id);
        let announced = env
            .events
            .reasons()
            .into_iter()
            .filter(|r| r == event_reasons::PROVISIONED)
            .count();
        assert_eq!(announced, 1);
    }

    #[tokio::test]
    async fn test_finalizer_is_persisted_before_backend_failure() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", None));
        env.cloud.inject_error("get_group", "InternalError", "backend unavailable");

        let err = env.reconcile_cluster("c1").await.unwrap_err();
        assert!(!err.is_terminal());

        let c = env.cluster("c1");
        assert!(has_finalizer(&c, CLUSTER_FINALIZER));
        assert!(correlation_annotation(&c).is_some());
        assert_eq!(reason(&c, NETWORK_INFRASTRUCTURE_READY).as_deref(), Some(reasons::CLUSTER_RECONCILIATION_FAILED));
        assert!(!c.status.unwrap().ready);
    }

    #[tokio::test]
    async fn test_resource_exhaustion_is_reported_and_resynced() {
        for (op, code, expected) in [
            ("reconcile_group", codes::OUT_OF_MEMORY, reasons::OUT_OF_MEMORY),
            ("reconcile_key_vault", codes::OUT_OF_CAPACITY, reasons::OUT_OF_CAPACITY),
        ] {
            let env = TestEnv::new();
            env.clusters.insert(cluster("c1", None));
            env.cloud.inject_error(op, code, "backend exhausted");

            let action = env.reconcile_cluster("c1").await.unwrap();
            assert_eq!(action, Action::requeue(RESYNC_INTERVAL), "{op}");

            let c = env.cluster("c1");
            let condition = conditions::get(&c, NETWORK_INFRASTRUCTURE_READY).unwrap();
            assert_eq!(condition.reason.as_deref(), Some(expected));
            assert_eq!(condition.severity, Some(ConditionSeverity::Error));
            assert!(!conditions::is_true(&c, READY));
            assert!(
                env.events.events().iter().any(|e| e.warning && e.reason == event_reasons::RESOURCE_EXHAUSTED),
                "{op}"
            );
        }
    }

    #[tokio::test]
    async fn test_backend_error_fails_reconciliation() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", None));
        env.cloud.inject_error("reconcile_virtual_network", "InternalError", "boom");

        assert!(env.reconcile_cluster("c1").await.is_err());
        let c = env.cluster("c1");
        let condition = conditions::get(&c, NETWORK_INFRASTRUCTURE_READY).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(reasons::CLUSTER_RECONCILIATION_FAILED));
        assert_eq!(condition.severity, Some(ConditionSeverity::Error));
        assert!(!env.cloud.has_key_vault(RESOURCE_GROUP, "c1-kv"));
    }

    #[tokio::test]
    async fn test_creates_load_balancer_child() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", Some(2)));

        let action = env.reconcile_cluster("c1").await.unwrap();
        assert_eq!(action, Action::requeue(SHORT_REQUEUE));

        let c = env.cluster("c1");
        assert_eq!(reason(&c, LOAD_BALANCER_READY).as_deref(), Some(reasons::WAITING_FOR_LOAD_BALANCER));
        assert!(!c.status.as_ref().unwrap().ready);

        let lb = env.load_balancer("c1-lb");
        assert_eq!(lb.spec.replicas, Some(2));
        assert_eq!(lb.spec.vm_size, "Default");
        assert_eq!(lb.metadata.labels.as_ref().unwrap().get(labels::CLUSTER_NAME).map(String::as_str), Some("c1"));
        assert_eq!(correlation_annotation(&lb), correlation_annotation(&c));
        let owner = &lb.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, FleetCluster::kind(&()));
        assert_eq!(owner.name, "c1");
        assert_eq!(owner.controller, Some(true));
    }

    #[tokio::test]
    async fn test_updates_cluster_owned_load_balancer_fields() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", Some(2)));
        env.reconcile_cluster("c1").await.unwrap();

        // Fields the cluster does not own are left alone
        let mut lb = env.load_balancer("c1-lb");
        lb.metadata.labels.get_or_insert_with(Default::default).insert("team".to_string(), "edge".to_string());
        env.load_balancers.update(&lb).await.unwrap();

        let mut c = env.cluster("c1");
        let spec = c.spec.load_balancer.as_mut().unwrap();
        spec.replicas = Some(3);
        spec.image.version = "1.1.0".to_string();
        env.clusters.update(&c).await.unwrap();
        env.reconcile_cluster("c1").await.unwrap();

        let lb = env.load_balancer("c1-lb");
        assert_eq!(lb.spec.replicas, Some(3));
        assert_eq!(lb.spec.image.version, "1.1.0");
        assert_eq!(lb.metadata.labels.as_ref().unwrap().get("team").map(String::as_str), Some("edge"));
    }

    #[tokio::test]
    async fn test_publishes_control_plane_endpoint() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", Some(1)));
        provision(&env).await;

        let c = env.cluster("c1");
        assert_eq!(
            c.spec.control_plane_endpoint,
            Some(ApiEndpoint { host: "10.0.0.100".to_string(), port: 6443 })
        );
        assert!(conditions::is_true(&c, LOAD_BALANCER_READY));
        assert!(conditions::is_true(&c, READY));
        assert_eq!(c.status.as_ref().unwrap().phase, Phase::Provisioned);
        assert_eq!(env.live_replicas("c1-lb").len(), 1);
        assert_eq!(env.reconcile_cluster("c1").await.unwrap(), Action::requeue(RESYNC_INTERVAL));
    }

    #[tokio::test]
    async fn test_delete_removes_orphaned_machines_first() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", Some(1)));
        provision(&env).await;

        let mut orphan = machine("orphan", "c1", Some("gone"));
        orphan.metadata.finalizers = Some(vec![MACHINE_FINALIZER.to_string()]);
        env.machines.insert(orphan);
        env.owner_machines.insert(owner_machine("live-owner", "c1", Some("live-bootstrap")));
        env.machines.insert(machine("owned", "c1", Some("live-owner")));

        env.clusters.delete(NAMESPACE, "c1").await.unwrap();
        let action = env.reconcile_cluster("c1").await.unwrap();
        assert_eq!(action, Action::requeue(SHORT_REQUEUE));

        let orphan = env.machine("orphan");
        assert!(is_deleting(&orphan));
        assert_eq!(correlation_annotation(&orphan), correlation_annotation(&env.cluster("c1")));
        assert!(!is_deleting(&env.machine("owned")));
        assert!(env.events.reasons().contains(&event_reasons::ORPHAN_DELETED.to_string()));

        // Nothing further is torn down while machines remain
        env.reconcile_cluster("c1").await.unwrap();
        assert!(!is_deleting(&env.load_balancer("c1-lb")));
        assert!(env.cloud.has_group(RESOURCE_GROUP));
        let c = env.cluster("c1");
        assert_eq!(c.status.as_ref().unwrap().phase, Phase::Deleting);
        assert!(has_finalizer(&c, CLUSTER_FINALIZER));
    }

    #[tokio::test]
    async fn test_delete_tears_down_in_order() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", Some(1)));
        provision(&env).await;

        env.clusters.delete(NAMESPACE, "c1").await.unwrap();
        let action = env.reconcile_cluster("c1").await.unwrap();
        assert_eq!(action, Action::requeue(SHORT_REQUEUE));
        assert!(is_deleting(&env.load_balancer("c1-lb")));
        assert!(env.cloud.has_key_vault(RESOURCE_GROUP, "c1-kv"));

        // The child tears down its replicas and cloud load balancer
        env.reconcile_load_balancer("c1-lb").await.unwrap();
        env.reconcile_virtual_machines().await;
        env.reconcile_load_balancer("c1-lb").await.unwrap();
        assert!(!env.load_balancers.contains(NAMESPACE, "c1-lb"));
        assert!(!env.cloud.has_load_balancer(RESOURCE_GROUP, "c1-lb"));

        env.cloud.clear_calls();
        let action = env.reconcile_cluster("c1").await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(
            env.cloud.mutating_calls(),
            vec!["delete_key_vault:c1-kv", "delete_virtual_network:c1-vnet", "delete_group:rg-test"]
        );
        assert!(!env.cloud.has_group(RESOURCE_GROUP));
        assert!(!env.clusters.contains(NAMESPACE, "c1"));
        assert!(env.events.reasons().contains(&event_reasons::DELETED.to_string()));
    }

    #[tokio::test]
    async fn test_delete_removes_replicas_left_by_a_deleted_load_balancer() {
        let env = TestEnv::new();
        let mut c = cluster("c1", None);
        c.metadata.finalizers = Some(vec![CLUSTER_FINALIZER.to_string()]);
        env.clusters.insert(c);
        let mut stray = virtual_machine("ghost-lb-1a2b3c4d", None);
        stray
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(labels::LOAD_BALANCER_NAME.to_string(), "ghost-lb".to_string());
        env.virtual_machines.insert(stray);

        env.clusters.delete(NAMESPACE, "c1").await.unwrap();
        let action = env.reconcile_cluster("c1").await.unwrap();
        assert_eq!(action, Action::requeue(SHORT_REQUEUE));
        assert!(env.virtual_machines.all().is_empty());

        assert_eq!(env.reconcile_cluster("c1").await.unwrap(), Action::await_change());
        assert!(!env.clusters.contains(NAMESPACE, "c1"));
    }

    #[tokio::test]
    async fn test_delete_treats_missing_cloud_resources_as_gone() {
        let env = TestEnv::new();
        let mut c = cluster("c1", None);
        c.metadata.finalizers = Some(vec![CLUSTER_FINALIZER.to_string()]);
        env.clusters.insert(c);

        env.clusters.delete(NAMESPACE, "c1").await.unwrap();
        assert_eq!(env.reconcile_cluster("c1").await.unwrap(), Action::await_change());
        assert!(!env.clusters.contains(NAMESPACE, "c1"));
    }

    #[tokio::test]
    async fn test_failed_cloud_delete_keeps_finalizer() {
        let env = TestEnv::new();
        env.clusters.insert(cluster("c1", None));
        env.reconcile_cluster("c1").await.unwrap();
        env.cloud.inject_error("delete_virtual_network", "InternalError", "vnet in use");

        env.clusters.delete(NAMESPACE, "c1").await.unwrap();
        assert!(env.reconcile_cluster("c1").await.is_err());
        let c = env.cluster("c1");
        assert!(has_finalizer(&c, CLUSTER_FINALIZER));
        assert_eq!(reason(&c, NETWORK_INFRASTRUCTURE_READY).as_deref(), Some(reasons::DELETION_FAILED));
        assert!(env.cloud.has_group(RESOURCE_GROUP));

        env.cloud.clear_errors();
        assert_eq!(env.reconcile_cluster("c1").await.unwrap(), Action::await_change());
        assert!(!env.cloud.has_group(RESOURCE_GROUP));
    }
}
