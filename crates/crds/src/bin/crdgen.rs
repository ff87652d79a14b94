//! Prints the fleet CRDs as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen | kubectl apply -f -`

use crds::{FleetCluster, FleetLoadBalancer, FleetMachine, FleetVirtualMachine};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        FleetCluster::crd(),
        FleetLoadBalancer::crd(),
        FleetMachine::crd(),
        FleetVirtualMachine::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
