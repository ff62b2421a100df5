//! The recursive divide-and-conquer placement engine.
//!
//! `recursive_mapping` alternates two partition steps: the cluster view is
//! split by the FM partitioner (cheapest min-cut record wins), then the
//! microservice set is split across the two halves by a per-microservice
//! utility score. Reservations made while scoring are speculative and are
//! undone before descending; each recursion level re-derives its own
//! reservations, and the single-node base case applies the real pending
//! reservations the top-level commit later folds in.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use motas_placement::{
    AppId, Cluster, GamaSpread, MsId, NodeId, PlacementError, Service, NOT_PLACED,
};

/// A finished placement: microservice id → node id.
pub type PlacementMapping = BTreeMap<MsId, NodeId>;

/// Weights of the three utility-score components.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub cost: f64,
    pub interference: f64,
    pub fragmentation: f64,
}

impl ScoreWeights {
    pub fn score(&self, cost: f64, inter: f64, frag: f64) -> f64 {
        self.cost * cost + self.interference * inter + self.fragmentation * frag
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            cost: 0.33,
            interference: 0.33,
            fragmentation: 0.33,
        }
    }
}

/// The winning candidate of one partition side for one microservice.
struct SideChoice {
    node: NodeId,
    cost: f64,
    inter: f64,
    frag: f64,
}

/// Owns the cluster and the registered applications; produces mappings.
///
/// All state mutated here is pending state. The orchestration loop decides
/// whether a produced mapping is committed (after the apply hook accepts
/// it) or rolled back.
pub struct PlacementEngine {
    cluster: Cluster,
    apps: BTreeMap<AppId, Service>,
    weights: ScoreWeights,
}

impl PlacementEngine {
    pub fn new(cluster: Cluster, weights: ScoreWeights) -> Self {
        Self {
            cluster,
            apps: BTreeMap::new(),
            weights,
        }
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn register_app(&mut self, app: Service) {
        self.apps.insert(app.id().to_string(), app);
    }

    pub fn app(&self, aid: &str) -> Option<&Service> {
        self.apps.get(aid)
    }

    pub fn remove_app(&mut self, aid: &str) -> Option<Service> {
        self.apps.remove(aid)
    }

    /// Committed placements across every registered application.
    pub fn placements(&self) -> PlacementMapping {
        let mut out = PlacementMapping::new();
        for app in self.apps.values() {
            for ms in app.microservices() {
                if ms.is_placed() {
                    out.insert(ms.id().to_string(), ms.place_node().to_string());
                }
            }
        }
        out
    }

    /// Compute a mapping for a registered application over the whole
    /// cluster. Leaves only pending state behind; pair with `commit_app`
    /// or `rollback_app`.
    ///
    /// The application must have been registered first.
    pub fn place_app(&mut self, aid: &str) -> Result<PlacementMapping, PlacementError> {
        let app = self
            .apps
            .get(aid)
            .expect("application registered before placement");
        let mss: BTreeSet<MsId> = app.ms_ids().into_iter().collect();
        let view = self.cluster.node_ids();
        self.recursive_mapping(aid, &mss, &view)
    }

    /// Fold the application's pending reservations and placements into
    /// committed state.
    pub fn commit_app(&mut self, aid: &str) {
        self.cluster.commit_stat();
        if let Some(app) = self.apps.get_mut(aid) {
            app.commit_place_stat();
        }
    }

    /// Discard the application's pending reservations and placements.
    pub fn rollback_app(&mut self, aid: &str) {
        self.cluster.rollback_stat();
        if let Some(app) = self.apps.get_mut(aid) {
            app.rollback_place_stat();
        }
    }

    fn recursive_mapping(
        &mut self,
        aid: &str,
        mss: &BTreeSet<MsId>,
        view: &[NodeId],
    ) -> Result<PlacementMapping, PlacementError> {
        let mut mapping = PlacementMapping::new();
        if mss.is_empty() {
            return Ok(mapping);
        }

        if view.len() == 1 {
            // Base case: everything left in this branch lands on the one
            // node. Bandwidth is reserved only toward dependences whose
            // downstream already has a pending placement; a reservation
            // toward the not-placed sentinel is a no-op.
            let nid = view[0].clone();
            let Self { cluster, apps, .. } = self;
            let app = apps
                .get_mut(aid)
                .expect("application registered before placement");
            for mid in mss {
                let Some(req) = app.microservice(mid).map(|m| m.res_req().clone()) else {
                    continue;
                };
                debug!(ms = %mid, node = %nid, "base case pre-placement");
                mapping.insert(mid.clone(), nid.clone());
                app.set_next_place_node(mid, &nid);
                cluster.inc_all_next_alloc(&nid, &req);
                cluster.update_next_gama(&nid);
                for dep in app.deps_of(mid) {
                    let dest = app
                        .microservice(&dep.dm_id)
                        .map(|dm| dm.next_place_node().to_string())
                        .unwrap_or_else(|| NOT_PLACED.to_string());
                    cluster.inc_next_band_alloc(&nid, &dest, dep.trans);
                }
            }
            return Ok(mapping);
        }

        let (view0, view1) = node_partition(&self.cluster, view);
        let (mss0, mss1, left_first) = {
            let Self {
                cluster,
                apps,
                weights,
            } = self;
            let app = apps
                .get_mut(aid)
                .expect("application registered before placement");
            microservice_partition(cluster, app, *weights, mss, &view0, &view1)?
        };

        let (mapping0, mapping1) = if left_first {
            let m0 = self.recursive_mapping(aid, &mss0, &view0)?;
            let m1 = self.recursive_mapping(aid, &mss1, &view1)?;
            (m0, m1)
        } else {
            let m1 = self.recursive_mapping(aid, &mss1, &view1)?;
            let m0 = self.recursive_mapping(aid, &mss0, &view0)?;
            (m0, m1)
        };
        mapping.extend(mapping0);
        mapping.extend(mapping1);
        Ok(mapping)
    }
}

/// Split `view` in two: among the FM records at minimum cut size, pick the
/// one whose left→right direct links are cheapest (first occurrence wins
/// ties).
fn node_partition(cluster: &Cluster, view: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
    let records = cluster.hyper_graph_partition(view);

    let mut min_cost = f64::MAX / 2.0;
    let mut min_idx = 0;
    for (idx, record) in records.iter().enumerate() {
        let mut cost = 0.0;
        for l in &record.left {
            for r in &record.right {
                if let Some(link) = cluster.link(l, r) {
                    cost += link.cost();
                }
            }
        }
        if cost < min_cost {
            min_cost = cost;
            min_idx = idx;
        }
    }

    let chosen = &records[min_idx];
    debug!(
        left = ?chosen.left,
        right = ?chosen.right,
        link_cost = min_cost,
        "node partition chosen"
    );
    (chosen.left.clone(), chosen.right.clone())
}

/// Assign each microservice of `mss` to one of the two views by utility
/// score, walking the application's topological order (callees first).
///
/// Scoring applies speculative pending reservations so later
/// microservices see the interference and fragmentation of earlier ones;
/// every such reservation is undone before returning. The pending
/// *placements* deliberately survive — the recursion and the bandwidth
/// filter read them.
fn microservice_partition(
    cluster: &mut Cluster,
    app: &mut Service,
    weights: ScoreWeights,
    mss: &BTreeSet<MsId>,
    view0: &[NodeId],
    view1: &[NodeId],
) -> Result<(BTreeSet<MsId>, BTreeSet<MsId>, bool), PlacementError> {
    let order: Vec<MsId> = app.topology_order().to_vec();
    let full_view = cluster.node_ids();

    let mut ms0 = BTreeSet::new();
    let mut ms1 = BTreeSet::new();
    let mut left_first = false;
    let mut applied: Vec<(MsId, NodeId)> = Vec::new();
    let mut gama_snapshot: BTreeMap<NodeId, GamaSpread> = BTreeMap::new();
    let mut index = 0usize;

    for mid in order {
        if !mss.contains(&mid) {
            continue;
        }

        let cands0 = cluster.filter_balance_node(view0, app, &mid);
        let cands1 = cluster.filter_balance_node(view1, app, &mid);
        if let (Err(err), Err(_)) = (&cands0, &cands1) {
            // Speculative reservations are left for the caller's rollback.
            return Err(err.clone());
        }

        let side0 = cands0
            .ok()
            .and_then(|c| evaluate_side(cluster, app, &mid, &c, &full_view));
        let side1 = cands1
            .ok()
            .and_then(|c| evaluate_side(cluster, app, &mid, &c, &full_view));

        let (goes_left, choice) = match (side0, side1) {
            (None, None) => {
                return Err(PlacementError::OutOfResources {
                    ms_id: mid.clone(),
                })
            }
            (Some(choice), None) => (true, choice),
            (None, Some(choice)) => (false, choice),
            (Some(c0), Some(c1)) => {
                let score0 = weights.score(c0.cost, c0.inter, c0.frag);
                let score1 = weights.score(c1.cost, c1.inter, c1.frag);
                // Ties go right.
                if score0 < score1 {
                    (true, c0)
                } else {
                    (false, c1)
                }
            }
        };

        if goes_left {
            ms0.insert(mid.clone());
            if index == 0 {
                left_first = true;
            }
        } else {
            ms1.insert(mid.clone());
        }
        debug!(
            ms = %mid,
            side = if goes_left { "left" } else { "right" },
            node = %choice.node,
            cost = choice.cost,
            inter = choice.inter,
            frag = choice.frag,
            "microservice assigned"
        );

        if let Some(spread) = cluster.node(&choice.node).map(|n| n.next_gama()) {
            gama_snapshot.entry(choice.node.clone()).or_insert(spread);
        }

        let req = app
            .microservice(&mid)
            .map(|m| m.res_req().clone())
            .unwrap_or_default();
        app.set_next_place_node(&mid, &choice.node);
        cluster.inc_all_next_alloc(&choice.node, &req);
        cluster.update_next_gama(&choice.node);
        for dep in app.deps_of(&mid) {
            let dest = app
                .microservice(&dep.dm_id)
                .map(|dm| dm.next_place_node().to_string())
                .unwrap_or_else(|| NOT_PLACED.to_string());
            cluster.inc_next_band_alloc(&choice.node, &dest, dep.trans);
        }
        applied.push((mid.clone(), choice.node));
        index += 1;
    }

    // Undo the speculative reservations so the descent re-derives its own;
    // the side assignment and the pending placements remain.
    for (mid, nid) in &applied {
        let req = app
            .microservice(mid)
            .map(|m| m.res_req().clone())
            .unwrap_or_default();
        cluster.dec_all_next_alloc(nid, &req);
        for dep in app.deps_of(mid) {
            let dest = app
                .microservice(&dep.dm_id)
                .map(|dm| dm.next_place_node().to_string())
                .unwrap_or_else(|| NOT_PLACED.to_string());
            cluster.dec_next_band_alloc(nid, &dest, dep.trans);
        }
    }
    for (nid, spread) in &gama_snapshot {
        cluster.restore_next_gama(nid, *spread);
    }

    Ok((ms0, ms1, left_first))
}

/// Pick the cheapest candidate of one side and price it: minimal summed
/// path cost toward the committed downstream placements, bandwidth
/// interference along those paths, and fleet-wide fragmentation. `None`
/// when the side has no candidate.
fn evaluate_side(
    cluster: &Cluster,
    app: &Service,
    mid: &str,
    candidates: &[NodeId],
    full_view: &[NodeId],
) -> Option<SideChoice> {
    if candidates.is_empty() {
        return None;
    }

    let mut dests: Vec<NodeId> = Vec::new();
    for dep in app.deps_of(mid) {
        if let Some(dm) = app.microservice(&dep.dm_id) {
            if dm.place_node() != NOT_PLACED {
                dests.push(dm.place_node().to_string());
            }
        }
    }

    let mut best: Option<(NodeId, f64, BTreeMap<NodeId, Vec<NodeId>>)> = None;
    for cand in candidates {
        let (cost, paths) = cluster.minimal_cost_path(full_view, cand, &dests);
        if best.as_ref().map(|(_, c, _)| cost < *c).unwrap_or(true) {
            best = Some((cand.clone(), cost, paths));
        }
    }
    let (node, cost, paths) = best?;

    let inter = interference(cluster, app, mid, &paths);
    let frag = fragmentation(cluster, app, mid, &node);
    Some(SideChoice {
        node,
        cost,
        inter,
        frag,
    })
}

/// Bandwidth pressure along the chosen shortest paths: each hop
/// contributes the dependence's demand divided by the link's residual
/// pending bandwidth.
fn interference(
    cluster: &Cluster,
    app: &Service,
    mid: &str,
    paths: &BTreeMap<NodeId, Vec<NodeId>>,
) -> f64 {
    let mut inter = 0.0;
    for dep in app.deps_of(mid) {
        let Some(dm) = app.microservice(&dep.dm_id) else {
            continue;
        };
        let Some(path) = paths.get(dm.place_node()) else {
            continue;
        };
        for hop in path.windows(2) {
            if let Some(link) = cluster.link(&hop[0], &hop[1]) {
                inter += dep.trans / (link.band_cap() - link.next_band_alloc());
            }
        }
    }
    inter
}

/// Fleet-wide RMS deviation of prospective utilization, summed over all
/// nodes: the per-node mean is weighted by the node's per-type args, the
/// deviation uses the raw ratios.
fn fragmentation(cluster: &Cluster, app: &Service, mid: &str, nid: &str) -> f64 {
    let Some(ms) = app.microservice(mid) else {
        return 0.0;
    };
    let mut frag = 0.0;
    for node in cluster.nodes() {
        let types = node.res_types();
        if types.is_empty() {
            continue;
        }
        let gamma = |typ| {
            let extra = if node.id() == nid {
                ms.res_req().get(&typ).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            (node.next_alloc(typ) + extra) / node.capa(typ)
        };

        let mut mean = 0.0;
        for &typ in types {
            mean += node.arg(typ) * gamma(typ);
        }
        mean /= types.len() as f64;

        let mut dev = 0.0;
        for &typ in types {
            let g = gamma(typ);
            dev += (g - mean) * (g - mean);
        }
        dev /= types.len() as f64;
        frag += dev.sqrt();
    }
    frag
}

#[cfg(test)]
mod tests {
    use super::*;
    use motas_placement::{Link, Microservice, Node, ResourceType};

    const MB: f64 = motas_placement::types::MB;

    fn one_node_cluster() -> Cluster {
        let mut c = Cluster::new();
        c.add_node(Node::new(
            "n0",
            &[(ResourceType::Cpu, 8.0), (ResourceType::Mem, 120.0 * MB)],
        ));
        c.add_link(Link::new("n0", "n0", 0.0, 30.0 * MB));
        c
    }

    fn chain_app() -> Service {
        let mut app = Service::new("app", "A", 5);
        for id in ["A", "B"] {
            app.add_microservice(Microservice::new(
                id,
                &[(ResourceType::Cpu, 2.0), (ResourceType::Mem, 25.0 * MB)],
            ));
        }
        app.add_dependence("A", "B", 15.0 * MB);
        app
    }

    #[test]
    fn score_weights_combine_components() {
        let w = ScoreWeights {
            cost: 1.0,
            interference: 2.0,
            fragmentation: 4.0,
        };
        assert_eq!(w.score(1.0, 1.0, 1.0), 7.0);
        assert_eq!(w.score(0.0, 0.5, 0.25), 2.0);
    }

    #[test]
    fn single_node_cluster_takes_everything() {
        let mut engine = PlacementEngine::new(one_node_cluster(), ScoreWeights::default());
        engine.register_app(chain_app());

        let mapping = engine.place_app("app").unwrap();

        assert_eq!(mapping.len(), 2);
        assert!(mapping.values().all(|n| n == "n0"));
        // Pending reservations reflect both microservices; nothing
        // committed yet.
        let node = engine.cluster().node("n0").unwrap();
        assert_eq!(node.next_alloc(ResourceType::Cpu), 4.0);
        assert_eq!(node.alloc(ResourceType::Cpu), 0.0);
    }

    #[test]
    fn base_case_skips_bandwidth_toward_unplaced_downstream() {
        // "A" is reserved before "B" in id order, so A's dependence sees a
        // downstream that is still unplaced and reserves nothing.
        let mut engine = PlacementEngine::new(one_node_cluster(), ScoreWeights::default());
        engine.register_app(chain_app());

        engine.place_app("app").unwrap();

        let link = engine.cluster().link("n0", "n0").unwrap();
        assert_eq!(link.next_band_alloc(), 0.0);
    }

    #[test]
    fn commit_app_folds_pending_state() {
        let mut engine = PlacementEngine::new(one_node_cluster(), ScoreWeights::default());
        engine.register_app(chain_app());

        engine.place_app("app").unwrap();
        engine.commit_app("app");

        let node = engine.cluster().node("n0").unwrap();
        assert_eq!(node.alloc(ResourceType::Cpu), 4.0);
        assert_eq!(node.alloc(ResourceType::Mem), 50.0 * MB);
        assert_eq!(engine.placements().len(), 2);
        assert!(engine.cluster().is_clean());
    }

    #[test]
    fn rollback_app_discards_pending_state() {
        let mut engine = PlacementEngine::new(one_node_cluster(), ScoreWeights::default());
        engine.register_app(chain_app());

        engine.place_app("app").unwrap();
        engine.rollback_app("app");

        let node = engine.cluster().node("n0").unwrap();
        assert_eq!(node.next_alloc(ResourceType::Cpu), 0.0);
        assert!(engine.cluster().is_clean());
        assert!(engine.app("app").unwrap().is_clean());
        assert!(engine.placements().is_empty());
    }

    #[test]
    fn fragmentation_is_zero_for_perfectly_even_usage() {
        let mut c = Cluster::new();
        c.add_node(Node::new(
            "n0",
            &[(ResourceType::Cpu, 10.0), (ResourceType::Mem, 10.0)],
        ));
        let mut app = Service::new("app", "A", 5);
        app.add_microservice(Microservice::new(
            "A",
            &[(ResourceType::Cpu, 5.0), (ResourceType::Mem, 5.0)],
        ));

        // Equal ratios on every dimension leave no deviation.
        assert_eq!(fragmentation(&c, &app, "A", "n0"), 0.0);
    }

    #[test]
    fn fragmentation_penalizes_uneven_usage() {
        let mut c = Cluster::new();
        c.add_node(Node::new(
            "n0",
            &[(ResourceType::Cpu, 10.0), (ResourceType::Mem, 10.0)],
        ));
        let mut even = Service::new("even", "A", 5);
        even.add_microservice(Microservice::new(
            "A",
            &[(ResourceType::Cpu, 5.0), (ResourceType::Mem, 5.0)],
        ));
        let mut skewed = Service::new("skewed", "A", 5);
        skewed.add_microservice(Microservice::new(
            "A",
            &[(ResourceType::Cpu, 5.0), (ResourceType::Mem, 0.0)],
        ));

        let balanced = fragmentation(&c, &even, "A", "n0");
        let lopsided = fragmentation(&c, &skewed, "A", "n0");
        assert!(lopsided > balanced);
    }

    #[test]
    fn empty_microservice_set_maps_to_nothing() {
        let mut engine = PlacementEngine::new(one_node_cluster(), ScoreWeights::default());
        let mut app = Service::new("empty", "A", 5);
        app.add_microservice(Microservice::new("A", &[(ResourceType::Cpu, 1.0)]));
        engine.register_app(app);

        let mss = BTreeSet::new();
        let view = engine.cluster.node_ids();
        let mapping = engine.recursive_mapping("empty", &mss, &view).unwrap();
        assert!(mapping.is_empty());
    }
}
