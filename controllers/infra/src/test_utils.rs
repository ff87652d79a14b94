//! Test fixtures: object builders and an in-memory controller context.

use crate::backoff::RetryTracker;
use crate::bootstrap::BootstrapDataProvider;
use crate::context::Context;
use crate::error::ControllerError;
use crate::events::MemoryEventSink;
use crate::metrics::Metrics;
use crate::reconciler;
use crate::store::MemoryStore;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cloud_client::MockCloudClient;
use crds::conditions::{self, NETWORK_INFRASTRUCTURE_READY};
use crds::labels;
use crds::{
    ClusterLoadBalancerSpec, FleetCluster, FleetClusterSpec, FleetLoadBalancer, FleetLoadBalancerSpec, FleetMachine,
    FleetMachineSpec, FleetVirtualMachine, FleetVirtualMachineSpec, Image, Machine, MachineSpec, NetworkSpec, OsDisk,
    SubnetSpec, VnetSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use kube_runtime::controller::Action;
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "default";
pub const RESOURCE_GROUP: &str = "rg-test";
pub const LOCATION: &str = "westus2";
pub const OPENSSH_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGZsZWV0LXRlc3Qta2V5 fleet@test";

/// Base64 form of [`OPENSSH_KEY`], as stored in specs
pub fn ssh_key() -> String {
    STANDARD.encode(OPENSSH_KEY)
}

pub fn meta(name: &str, labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        ..Default::default()
    }
}

pub fn image(version: &str) -> Image {
    Image { name: "fleet-lb".to_string(), version: version.to_string() }
}

pub fn cluster(name: &str, lb_replicas: Option<i32>) -> FleetCluster {
    FleetCluster {
        metadata: meta(name, &[]),
        spec: FleetClusterSpec {
            location: LOCATION.to_string(),
            resource_group: RESOURCE_GROUP.to_string(),
            network_spec: NetworkSpec {
                vnet: VnetSpec { name: format!("{name}-vnet"), cidr_block: Some("10.0.0.0/16".to_string()) },
                subnets: vec![SubnetSpec { name: "default".to_string(), cidr_block: Some("10.0.1.0/24".to_string()) }],
            },
            load_balancer: lb_replicas.map(|replicas| ClusterLoadBalancerSpec {
                image: image("1.0.0"),
                vm_size: "Default".to_string(),
                ssh_public_key: ssh_key(),
                replicas: Some(replicas),
            }),
            control_plane_endpoint: None,
        },
        status: None,
    }
}

/// A cluster whose network infrastructure is already reported ready.
pub fn ready_cluster(name: &str) -> FleetCluster {
    let mut c = cluster(name, None);
    conditions::mark_true(&mut c, NETWORK_INFRASTRUCTURE_READY);
    c
}

pub fn load_balancer(name: &str, cluster_name: &str, replicas: Option<i32>, version: &str) -> FleetLoadBalancer {
    FleetLoadBalancer {
        metadata: meta(name, &[(labels::CLUSTER_NAME, cluster_name)]),
        spec: FleetLoadBalancerSpec {
            image: image(version),
            vm_size: "Default".to_string(),
            ssh_public_key: ssh_key(),
            replicas,
        },
        status: None,
    }
}

pub fn owner_machine(name: &str, cluster_name: &str, data_secret: Option<&str>) -> Machine {
    let mut m = Machine::new(
        name,
        MachineSpec {
            cluster_name: cluster_name.to_string(),
            bootstrap: crds::Bootstrap { data_secret_name: data_secret.map(str::to_string) },
            version: Some("v1.30.2".to_string()),
        },
    );
    m.metadata.namespace = Some(NAMESPACE.to_string());
    m
}

/// Machine owned by the Cluster API machine `owner`, if given
pub fn machine(name: &str, cluster_name: &str, owner: Option<&str>) -> FleetMachine {
    let mut metadata = meta(name, &[(labels::CLUSTER_NAME, cluster_name)]);
    metadata.owner_references = owner.map(|owner| {
        vec![OwnerReference {
            api_version: Machine::api_version(&()).to_string(),
            kind: Machine::kind(&()).to_string(),
            name: owner.to_string(),
            uid: format!("uid-{owner}"),
            controller: Some(true),
            ..Default::default()
        }]
    });
    FleetMachine {
        metadata,
        spec: FleetMachineSpec {
            vm_size: "Standard".to_string(),
            image: image("1.30.2"),
            os_disk: OsDisk::default(),
            availability_zone: Some("1".to_string()),
            location: LOCATION.to_string(),
            ssh_public_key: ssh_key(),
            availability_set: None,
            provider_id: None,
        },
        status: None,
    }
}

pub fn virtual_machine(name: &str, availability_set: Option<&str>) -> FleetVirtualMachine {
    FleetVirtualMachine {
        metadata: meta(name, &[(labels::CLUSTER_NAME, "c1")]),
        spec: FleetVirtualMachineSpec {
            vm_size: "Standard".to_string(),
            image: image("1.0.0"),
            os_disk: OsDisk::default(),
            location: LOCATION.to_string(),
            availability_zone: None,
            availability_set: availability_set.map(str::to_string),
            resource_group: RESOURCE_GROUP.to_string(),
            cluster_name: "c1".to_string(),
            vnet_name: "c1-vnet".to_string(),
            subnet_name: "default".to_string(),
            ssh_public_key: ssh_key(),
            bootstrap_data: None,
            backend_pool_names: Vec::new(),
        },
        status: None,
    }
}

/// Bootstrap provider returning a scripted payload
#[derive(Clone, Default)]
pub struct StaticBootstrapData {
    data: Arc<Mutex<Option<String>>>,
}

impl StaticBootstrapData {
    pub fn set(&self, data: Option<&str>) {
        *self.data.lock().unwrap() = data.map(|d| STANDARD.encode(d));
    }
}

#[async_trait::async_trait]
impl BootstrapDataProvider for StaticBootstrapData {
    async fn bootstrap_data(&self, _namespace: &str, _owner: &Machine) -> Result<Option<String>, ControllerError> {
        Ok(self.data.lock().unwrap().clone())
    }
}

/// In-memory controller with handles on every backing fake
pub struct TestEnv {
    pub ctx: Arc<Context>,
    pub clusters: MemoryStore<FleetCluster>,
    pub load_balancers: MemoryStore<FleetLoadBalancer>,
    pub machines: MemoryStore<FleetMachine>,
    pub virtual_machines: MemoryStore<FleetVirtualMachine>,
    pub owner_machines: MemoryStore<Machine>,
    pub cloud: MockCloudClient,
    pub events: MemoryEventSink,
    pub bootstrap: StaticBootstrapData,
}

impl TestEnv {
    pub fn new() -> Self {
        let clusters = MemoryStore::new();
        let load_balancers = MemoryStore::new();
        let machines = MemoryStore::new();
        let virtual_machines = MemoryStore::new();
        let owner_machines = MemoryStore::new();
        let cloud = MockCloudClient::default();
        let events = MemoryEventSink::default();
        let bootstrap = StaticBootstrapData::default();
        bootstrap.set(Some("#cloud-config\n"));

        let ctx = Arc::new(Context {
            clusters: Arc::new(clusters.clone()),
            load_balancers: Arc::new(load_balancers.clone()),
            machines: Arc::new(machines.clone()),
            virtual_machines: Arc::new(virtual_machines.clone()),
            owner_machines: Arc::new(owner_machines.clone()),
            cloud: Arc::new(cloud.clone()),
            bootstrap: Arc::new(bootstrap.clone()),
            events: Arc::new(events.clone()),
            metrics: Metrics::new().unwrap(),
            retries: RetryTracker::default(),
        });

        Self { ctx, clusters, load_balancers, machines, virtual_machines, owner_machines, cloud, events, bootstrap }
    }

    pub fn cluster(&self, name: &str) -> FleetCluster {
        self.clusters.fetch(NAMESPACE, name).expect("cluster exists")
    }

    pub fn load_balancer(&self, name: &str) -> FleetLoadBalancer {
        self.load_balancers.fetch(NAMESPACE, name).expect("load balancer exists")
    }

    pub fn machine(&self, name: &str) -> FleetMachine {
        self.machines.fetch(NAMESPACE, name).expect("machine exists")
    }

    pub fn virtual_machine(&self, name: &str) -> FleetVirtualMachine {
        self.virtual_machines.fetch(NAMESPACE, name).expect("virtual machine exists")
    }

    pub async fn reconcile_cluster(&self, name: &str) -> Result<Action, ControllerError> {
        reconciler::reconcile_cluster(Arc::new(self.cluster(name)), self.ctx.clone()).await
    }

    pub async fn reconcile_load_balancer(&self, name: &str) -> Result<Action, ControllerError> {
        reconciler::reconcile_load_balancer(Arc::new(self.load_balancer(name)), self.ctx.clone()).await
    }

    pub async fn reconcile_machine(&self, name: &str) -> Result<Action, ControllerError> {
        reconciler::reconcile_machine(Arc::new(self.machine(name)), self.ctx.clone()).await
    }

    pub async fn reconcile_virtual_machine(&self, name: &str) -> Result<Action, ControllerError> {
        reconciler::reconcile_virtual_machine(Arc::new(self.virtual_machine(name)), self.ctx.clone()).await
    }

    /// One pass over every FleetVirtualMachine, deleting ones included.
    pub async fn reconcile_virtual_machines(&self) {
        for vm in self.virtual_machines.all() {
            let name = vm.metadata.name.clone().unwrap_or_default();
            reconciler::reconcile_virtual_machine(Arc::new(vm), self.ctx.clone())
                .await
                .unwrap_or_else(|e| panic!("virtual machine {name} failed: {e}"));
        }
    }

    /// Replicas of `load_balancer` that are not being deleted.
    pub fn live_replicas(&self, load_balancer: &str) -> Vec<FleetVirtualMachine> {
        let selector = labels::load_balancer_selector(load_balancer);
        self.virtual_machines
            .all()
            .into_iter()
            .filter(|vm| labels::matches(vm.metadata.labels.as_ref(), &selector))
            .filter(|vm| vm.metadata.deletion_timestamp.is_none())
            .collect()
    }
}

pub fn correlation_annotation<K: Resource>(obj: &K) -> Option<String> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(labels::CORRELATION_ID))
        .cloned()
}
