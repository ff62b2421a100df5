//! Placement scenarios run directly against the engine, plus the
//! reservation-accounting invariants the commit/rollback pair must keep.
//!
//! Where a scenario's exact node assignment depends on score ties, the
//! assertions check the accounting invariants rather than pin specific
//! nodes; the deterministic two-node scenarios pin exact placements.

mod common;

use std::collections::BTreeMap;

use motas_placement::{Cluster, Link, Microservice, Node, PlacementError, ResourceType, Service};
use motas_scheduler::{PlacementEngine, PlacementMapping, ScoreWeights};

use common::{test_cluster, test_service, MB};

fn engine_with(cluster: Cluster, app: Service) -> PlacementEngine {
    let mut engine = PlacementEngine::new(cluster, ScoreWeights::default());
    engine.register_app(app);
    engine
}

/// Committed per-node usage derived from a mapping, for the accounting
/// checks below.
fn demand_by_node(
    app: &Service,
    mapping: &PlacementMapping,
) -> BTreeMap<String, BTreeMap<ResourceType, f64>> {
    let mut out: BTreeMap<String, BTreeMap<ResourceType, f64>> = BTreeMap::new();
    for (mid, nid) in mapping {
        let ms = app.microservice(mid).unwrap();
        let entry = out.entry(nid.clone()).or_default();
        for (&typ, &req) in ms.res_req() {
            *entry.entry(typ).or_insert(0.0) += req;
        }
    }
    out
}

#[test]
fn six_microservice_app_places_within_capacity() {
    common::init_tracing();
    let cluster = test_cluster(8.0, 120.0 * MB, 30.0 * MB);
    let app = test_service(2.0, 25.0 * MB, 15.0 * MB);
    let mut engine = engine_with(cluster, app);

    let mapping = engine.place_app("test0").expect("placement must succeed");
    assert_eq!(mapping.len(), 6, "every microservice must be mapped");
    engine.commit_app("test0");

    // Committed allocations equal the demand of the microservices mapped
    // to each node, and stay within capacity.
    let demand = demand_by_node(engine.app("test0").unwrap(), &mapping);
    for node in engine.cluster().nodes() {
        let placed = demand.get(node.id());
        for &typ in node.res_types() {
            let expected = placed
                .and_then(|d| d.get(&typ).copied())
                .unwrap_or(0.0);
            assert_eq!(
                node.alloc(typ),
                expected,
                "node {} alloc mismatch for {typ}",
                node.id()
            );
            assert!(node.alloc(typ) <= node.capa(typ));
        }
    }

    // Every used link stays within its bandwidth capacity.
    for link in engine.cluster().links() {
        assert!(
            link.band_alloc() <= link.band_cap(),
            "link {} -> {} over capacity: {} > {}",
            link.from(),
            link.to(),
            link.band_alloc(),
            link.band_cap()
        );
    }

    assert!(engine.cluster().is_clean());
    assert!(engine.app("test0").unwrap().is_clean());
}

#[test]
fn undersized_node_is_excluded_from_placement() {
    // node1 cannot host any microservice (cpu capacity 1 < request 2);
    // the remaining three nodes must carry the whole application.
    let mut cluster = test_cluster(8.0, 120.0 * MB, 30.0 * MB);
    cluster.add_node(Node::new(
        "node1",
        &[(ResourceType::Cpu, 1.0), (ResourceType::Mem, 120.0 * MB)],
    ));
    let app = test_service(2.0, 25.0 * MB, 15.0 * MB);
    let mut engine = engine_with(cluster, app);

    let mapping = engine.place_app("test0").expect("placement must succeed");
    engine.commit_app("test0");

    assert_eq!(mapping.len(), 6);
    assert!(
        !mapping.values().any(|nid| nid == "node1"),
        "undersized node must not receive microservices: {mapping:?}"
    );
    let node1 = engine.cluster().node("node1").unwrap();
    assert_eq!(node1.alloc(ResourceType::Cpu), 0.0);
}

#[test]
fn starved_link_fails_the_bandwidth_filter_only() {
    // The direct link node0 -> node3 has almost no bandwidth and B is
    // pre-placed on node3: node0 passes the capacity and balance checks
    // but falls at the bandwidth condition for A.
    let mut cluster = test_cluster(8.0, 120.0 * MB, 30.0 * MB);
    cluster.add_link(Link::new("node0", "node3", 1.0, 0.5 * MB));
    let mut app = test_service(2.0, 25.0 * MB, 15.0 * MB);
    app.set_next_place_node("B", "node3");

    let candidates = cluster
        .filter_balance_node(&cluster.node_ids(), &app, "A")
        .expect("capacity filter must pass");

    assert!(!candidates.contains(&"node0".to_string()));
    assert!(candidates.contains(&"node1".to_string()));
    assert!(candidates.contains(&"node2".to_string()));
}

#[test]
fn cross_node_dependence_reserves_bandwidth_both_ways() {
    // Two nodes; B is too large to share a node with A, so the pair must
    // split and the A -> B demand lands on both directions of the
    // connecting link.
    let mut cluster = Cluster::new();
    for id in ["n0", "n1"] {
        cluster.add_node(Node::new(
            id,
            &[(ResourceType::Cpu, 8.0), (ResourceType::Mem, 120.0 * MB)],
        ));
        cluster.add_link(Link::new(id, id, 0.0, 30.0 * MB));
    }
    cluster.add_link(Link::new("n0", "n1", 1.0, 30.0 * MB));
    cluster.add_link(Link::new("n1", "n0", 1.0, 30.0 * MB));

    let mut app = Service::new("pair", "A", 5);
    app.add_microservice(Microservice::new(
        "A",
        &[(ResourceType::Cpu, 2.0), (ResourceType::Mem, 25.0 * MB)],
    ));
    app.add_microservice(Microservice::new(
        "B",
        &[(ResourceType::Cpu, 7.0), (ResourceType::Mem, 30.0 * MB)],
    ));
    app.add_dependence("A", "B", 10.0 * MB);

    let mut engine = engine_with(cluster, app);
    let mapping = engine.place_app("pair").expect("placement must succeed");
    engine.commit_app("pair");

    assert_eq!(mapping.get("A"), Some(&"n0".to_string()));
    assert_eq!(mapping.get("B"), Some(&"n1".to_string()));

    // The committed bandwidth on each direction of the pair link equals
    // the one dependence crossing it.
    let c = engine.cluster();
    assert_eq!(c.link("n0", "n1").unwrap().band_alloc(), 10.0 * MB);
    assert_eq!(c.link("n1", "n0").unwrap().band_alloc(), 10.0 * MB);
    assert_eq!(c.link("n0", "n0").unwrap().band_alloc(), 0.0);
    assert_eq!(c.link("n1", "n1").unwrap().band_alloc(), 0.0);

    // And the node accounting matches the split.
    assert_eq!(c.node("n0").unwrap().alloc(ResourceType::Cpu), 2.0);
    assert_eq!(c.node("n1").unwrap().alloc(ResourceType::Cpu), 7.0);
}

#[test]
fn impossible_demand_errors_and_rolls_back_bitwise() {
    let mut cluster = Cluster::new();
    for id in ["n0", "n1"] {
        cluster.add_node(Node::new(
            id,
            &[(ResourceType::Cpu, 8.0), (ResourceType::Mem, 120.0 * MB)],
        ));
    }
    cluster.add_link(Link::new("n0", "n1", 1.0, 30.0 * MB));
    cluster.add_link(Link::new("n1", "n0", 1.0, 30.0 * MB));

    let mut app = Service::new("greedy", "A", 5);
    app.add_microservice(Microservice::new(
        "A",
        &[(ResourceType::Cpu, 100.0), (ResourceType::Mem, 25.0 * MB)],
    ));

    let mut engine = engine_with(cluster, app);
    let result = engine.place_app("greedy");
    assert!(matches!(
        result,
        Err(PlacementError::OutOfResources { .. })
    ));

    engine.rollback_app("greedy");

    let c = engine.cluster();
    assert!(c.is_clean(), "pending state must match committed state");
    for node in c.nodes() {
        for &typ in node.res_types() {
            assert_eq!(node.alloc(typ), 0.0);
            assert_eq!(node.next_alloc(typ), 0.0);
        }
    }
    let app = engine.app("greedy").unwrap();
    assert!(app.is_clean());
    assert!(!app.microservice("A").unwrap().is_placed());
}

#[test]
fn second_app_sees_the_first_apps_committed_usage() {
    // Fill most of the four-node cluster with one application, then place
    // a second one; both must respect node capacity together.
    let cluster = test_cluster(8.0, 120.0 * MB, 30.0 * MB);
    let first = test_service(2.0, 25.0 * MB, 15.0 * MB);
    let mut engine = engine_with(cluster, first);
    engine.place_app("test0").expect("first placement");
    engine.commit_app("test0");

    let mut second = Service::new("second", "X", 4);
    second.add_microservice(Microservice::new(
        "X",
        &[(ResourceType::Cpu, 2.0), (ResourceType::Mem, 25.0 * MB)],
    ));
    engine.register_app(second);
    let mapping = engine.place_app("second").expect("second placement");
    engine.commit_app("second");

    assert_eq!(mapping.len(), 1);
    for node in engine.cluster().nodes() {
        for &typ in node.res_types() {
            assert!(node.alloc(typ) <= node.capa(typ));
        }
    }
    // Both apps are visible in the committed placements.
    assert_eq!(engine.placements().len(), 7);
}
