//! Shared fixtures: a four-node full-mesh cluster and a six-microservice
//! application, the canonical pair the scenario tests run against.

#![allow(dead_code)]

use motas_placement::{Cluster, Link, Microservice, Node, ResourceType, Service};

pub const MB: f64 = motas_placement::types::MB;

/// Four worker nodes, fully meshed (self-loops included) with uniform
/// link cost 1 and the given bandwidth capacity.
pub fn test_cluster(cpu: f64, mem: f64, band: f64) -> Cluster {
    let mut cluster = Cluster::new();
    let ids = ["node0", "node1", "node2", "node3"];
    for id in ids {
        cluster.add_node(Node::new(
            id,
            &[(ResourceType::Cpu, cpu), (ResourceType::Mem, mem)],
        ));
    }
    for from in ids {
        for to in ids {
            let cost = if from == to { 0.0 } else { 1.0 };
            cluster.add_link(Link::new(from, to, cost, band));
        }
    }
    cluster
}

/// The call graph A → {B, C}, B → {D, E}, C → {D, F}; every microservice
/// has the same resource demand and every edge the same bandwidth demand.
pub fn test_service(cpu: f64, mem: f64, band_req: f64) -> Service {
    let mut app = Service::new("test0", "A", 5);
    for id in ["A", "B", "C", "D", "E", "F"] {
        app.add_microservice(Microservice::new(
            id,
            &[(ResourceType::Cpu, cpu), (ResourceType::Mem, mem)],
        ));
    }
    app.add_dependence("A", "B", band_req);
    app.add_dependence("A", "C", band_req);
    app.add_dependence("B", "D", band_req);
    app.add_dependence("B", "E", band_req);
    app.add_dependence("C", "D", band_req);
    app.add_dependence("C", "F", band_req);
    app
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
