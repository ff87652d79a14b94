//! Label, annotation and finalizer keys shared by controllers.

use std::collections::BTreeMap;

/// Cluster API label naming the owning cluster.
pub const CLUSTER_NAME: &str = "cluster.x-k8s.io/cluster-name";

/// Label selecting the replicas of a load balancer.
pub const LOAD_BALANCER_NAME: &str = "infrastructure.fleet.dev/load-balancer-name";

/// Image version a replica was created with.
pub const IMAGE_VERSION: &str = "infrastructure.fleet.dev/image-version";

/// Role of a virtual machine (`machine` or `load-balancer`).
pub const MACHINE_ROLE: &str = "infrastructure.fleet.dev/machine-role";

/// Role value for tenant machines.
pub const ROLE_MACHINE: &str = "machine";

/// Role value for load balancer replicas.
pub const ROLE_LOAD_BALANCER: &str = "load-balancer";

/// Diagnostic correlation id propagated from a cluster to its children.
pub const CORRELATION_ID: &str = "infrastructure.fleet.dev/correlation-id";

/// Finalizer for FleetCluster objects.
pub const CLUSTER_FINALIZER: &str = "fleetcluster.infrastructure.fleet.dev";

/// Finalizer for FleetLoadBalancer objects.
pub const LOAD_BALANCER_FINALIZER: &str = "fleetloadbalancer.infrastructure.fleet.dev";

/// Finalizer for FleetMachine objects.
pub const MACHINE_FINALIZER: &str = "fleetmachine.infrastructure.fleet.dev";

/// Finalizer for FleetVirtualMachine objects.
pub const VIRTUAL_MACHINE_FINALIZER: &str = "fleetvirtualmachine.infrastructure.fleet.dev";

/// Labels selecting the replicas of one load balancer.
pub fn load_balancer_selector(load_balancer_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LOAD_BALANCER_NAME.to_string(), load_balancer_name.to_string())])
}

/// Labels selecting every fleet object of one cluster.
pub fn cluster_selector(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLUSTER_NAME.to_string(), cluster_name.to_string())])
}

/// Renders a selector as `k=v,k2=v2` in key order.
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `labels` contains every pair of `selector`.
pub fn matches(labels: Option<&BTreeMap<String, String>>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_string_is_ordered() {
        let mut selector = load_balancer_selector("lb");
        selector.insert(CLUSTER_NAME.to_string(), "c1".to_string());
        assert_eq!(
            selector_string(&selector),
            "cluster.x-k8s.io/cluster-name=c1,infrastructure.fleet.dev/load-balancer-name=lb"
        );
    }

    #[test]
    fn test_matches() {
        let selector = load_balancer_selector("lb");
        let mut labels = BTreeMap::new();
        assert!(!matches(None, &selector));
        assert!(!matches(Some(&labels), &selector));
        labels.insert(LOAD_BALANCER_NAME.to_string(), "lb".to_string());
        labels.insert(IMAGE_VERSION.to_string(), "v1".to_string());
        assert!(matches(Some(&labels), &selector));
        assert!(matches(Some(&labels), &BTreeMap::new()));
    }
}
