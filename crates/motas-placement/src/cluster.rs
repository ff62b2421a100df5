//! Cluster profile — worker nodes, directed links, and the two-phase
//! resource reservation they carry.
//!
//! A `Cluster` is the single source of truth for node and link state.
//! Sub-clusters produced by partitioning are *views*: sorted slices of
//! node ids evaluated against this one structure, so pending reservations
//! made during a descent are visible everywhere and can be undone in one
//! place.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use motas_collections::{PriorityQueue, Stack};

use crate::error::PlacementError;
use crate::hypergraph::{self, PartitionRecord};
use crate::service::Service;
use crate::types::{NodeId, ResourceType, TwoPhase, NOT_PLACED, PREV_NULL};

/// Default allowed spread between a node's max and min pending utilization.
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Default per-type weight in the fragmentation metric.
pub const DEFAULT_ARG_WEIGHT: f64 = 0.5;

/// Utilization extremes across a node's resource types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GamaSpread {
    pub max: f64,
    pub min: f64,
}

impl GamaSpread {
    /// The pre-allocation sentinel pair: max below any real ratio, min
    /// above any real ratio, so the first `update_next_gama` overwrites
    /// both.
    fn unset() -> Self {
        Self {
            max: 0.0,
            min: f64::MAX,
        }
    }
}

/// A worker node with multi-dimensional capacity.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    /// The resource dimensions this node exposes, in declaration order.
    res_types: Vec<ResourceType>,
    /// Immutable capacity per type.
    capa: BTreeMap<ResourceType, f64>,
    /// Committed/pending reservation per type.
    alloc: BTreeMap<ResourceType, TwoPhase<f64>>,
    /// Per-type weight for the fragmentation metric.
    args: BTreeMap<ResourceType, f64>,
    /// Committed/pending utilization extremes.
    gama: TwoPhase<GamaSpread>,
    /// Allowed spread between max and min pending utilization, in (0, 1].
    threshold: f64,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, capacities: &[(ResourceType, f64)]) -> Self {
        let mut res_types = Vec::with_capacity(capacities.len());
        let mut capa = BTreeMap::new();
        let mut alloc = BTreeMap::new();
        let mut args = BTreeMap::new();
        for &(typ, value) in capacities {
            res_types.push(typ);
            capa.insert(typ, value);
            alloc.insert(typ, TwoPhase::new(0.0));
            args.insert(typ, DEFAULT_ARG_WEIGHT);
        }
        Self {
            id: id.into(),
            res_types,
            capa,
            alloc,
            args,
            gama: TwoPhase::new(GamaSpread::unset()),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_arg(mut self, typ: ResourceType, weight: f64) -> Self {
        self.args.insert(typ, weight);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn res_types(&self) -> &[ResourceType] {
        &self.res_types
    }

    pub fn capa(&self, typ: ResourceType) -> f64 {
        self.capa.get(&typ).copied().unwrap_or(0.0)
    }

    /// Committed reservation for `typ`.
    pub fn alloc(&self, typ: ResourceType) -> f64 {
        self.alloc.get(&typ).map(|a| *a.committed()).unwrap_or(0.0)
    }

    /// Pending reservation for `typ`.
    pub fn next_alloc(&self, typ: ResourceType) -> f64 {
        self.alloc.get(&typ).map(|a| *a.pending()).unwrap_or(0.0)
    }

    pub fn arg(&self, typ: ResourceType) -> f64 {
        self.args.get(&typ).copied().unwrap_or(DEFAULT_ARG_WEIGHT)
    }

    pub fn gama(&self) -> GamaSpread {
        *self.gama.committed()
    }

    pub fn next_gama(&self) -> GamaSpread {
        *self.gama.pending()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn is_clean(&self) -> bool {
        self.gama.is_clean() && self.alloc.values().all(TwoPhase::is_clean)
    }
}

/// A directed link between two nodes, with routing cost and bandwidth.
#[derive(Debug, Clone)]
pub struct Link {
    from: NodeId,
    to: NodeId,
    cost: f64,
    band_cap: f64,
    band: TwoPhase<f64>,
}

impl Link {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, cost: f64, band_cap: f64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            cost,
            band_cap,
            band: TwoPhase::new(0.0),
        }
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn band_cap(&self) -> f64 {
        self.band_cap
    }

    /// Committed bandwidth reservation.
    pub fn band_alloc(&self) -> f64 {
        *self.band.committed()
    }

    /// Pending bandwidth reservation.
    pub fn next_band_alloc(&self) -> f64 {
        *self.band.pending()
    }
}

/// Dijkstra work item; one of the two priority-queue instantiations.
struct CostPair {
    id: NodeId,
    cost: f64,
}

/// The cluster of worker nodes and the links between them.
///
/// Absence of a `(from, to)` entry in the link table means the link does
/// not exist: nothing routes through it and bandwidth reservations toward
/// it are no-ops.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    nodes: BTreeMap<NodeId, Node>,
    links: BTreeMap<NodeId, BTreeMap<NodeId, Link>>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_link(&mut self, link: Link) {
        self.links
            .entry(link.from.clone())
            .or_default()
            .insert(link.to.clone(), link);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All node ids in ascending order — the full-cluster view.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn link(&self, from: &str, to: &str) -> Option<&Link> {
        self.links.get(from).and_then(|m| m.get(to))
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values().flat_map(|m| m.values())
    }

    pub(crate) fn link_table(&self) -> &BTreeMap<NodeId, BTreeMap<NodeId, Link>> {
        &self.links
    }

    /// Run the FM partitioner over `view` and return every partition
    /// record at the minimum positive cut size.
    pub fn hyper_graph_partition(&self, view: &[NodeId]) -> Vec<PartitionRecord> {
        hypergraph::partition(self, view)
    }

    /// Filter the view's nodes down to those that can host `mid`.
    ///
    /// Three successive conditions:
    ///
    /// 1. capacity — every required type fits within `capa` given the
    ///    current pending allocation; no survivor is a hard
    ///    [`PlacementError::OutOfResources`]
    /// 2. balance — folding the prospective utilization of the required
    ///    types into the node's pending extremes keeps the spread within
    ///    the node's threshold; filters without error
    /// 3. bandwidth — every outgoing dependence whose downstream already
    ///    has a pending placement must have a direct link with enough
    ///    residual bandwidth; filters without error
    ///
    /// Reads pending state only; never mutates.
    pub fn filter_balance_node(
        &self,
        view: &[NodeId],
        app: &Service,
        mid: &str,
    ) -> Result<Vec<NodeId>, PlacementError> {
        let Some(ms) = app.microservice(mid) else {
            return Ok(Vec::new());
        };

        // Condition 1: resource capacity.
        let mut survivors = Vec::new();
        for nid in view {
            let Some(node) = self.nodes.get(nid) else {
                continue;
            };
            let mut fits = true;
            for (&typ, &req) in ms.res_req() {
                match node.capa.get(&typ) {
                    Some(&capa) if node.next_alloc(typ) + req <= capa => {}
                    _ => {
                        debug!(
                            ms = mid,
                            node = %node.id,
                            %typ,
                            req,
                            alloc = node.next_alloc(typ),
                            capa = node.capa(typ),
                            "capacity filter rejects node"
                        );
                        fits = false;
                        break;
                    }
                }
            }
            if fits {
                survivors.push(nid.clone());
            }
        }
        if survivors.is_empty() {
            return Err(PlacementError::OutOfResources {
                ms_id: mid.to_string(),
            });
        }

        // Condition 2: balance — prospective utilization spread.
        let mut balanced = Vec::new();
        for nid in &survivors {
            let Some(node) = self.nodes.get(nid) else {
                continue;
            };
            let GamaSpread {
                mut max, mut min, ..
            } = node.next_gama();
            for (&typ, &req) in ms.res_req() {
                let gama = (node.next_alloc(typ) + req) / node.capa(typ);
                if gama < min {
                    min = gama;
                }
                if gama > max {
                    max = gama;
                }
            }
            if max - min > node.threshold {
                debug!(
                    ms = mid,
                    node = %node.id,
                    spread = max - min,
                    threshold = node.threshold,
                    "balance filter rejects node"
                );
                continue;
            }
            balanced.push(nid.clone());
        }

        // Condition 3: residual bandwidth toward pre-placed downstreams.
        // Single-hop only; multi-hop routing is not consulted here.
        let mut placeable = Vec::new();
        for nid in &balanced {
            let mut reachable = true;
            for dep in app.deps_of(mid) {
                let dest = app
                    .microservice(&dep.dm_id)
                    .map(|dm| dm.next_place_node().to_string())
                    .unwrap_or_else(|| NOT_PLACED.to_string());
                if dest == NOT_PLACED {
                    continue;
                }
                match self.link(nid, &dest) {
                    Some(link) if dep.trans + link.next_band_alloc() <= link.band_cap() => {}
                    _ => {
                        debug!(
                            ms = mid,
                            node = %nid,
                            dest = %dest,
                            trans = dep.trans,
                            "bandwidth filter rejects node"
                        );
                        reachable = false;
                        break;
                    }
                }
            }
            if reachable {
                placeable.push(nid.clone());
            }
        }

        Ok(placeable)
    }

    /// Heap-optimized Dijkstra from `src` over link cost, confined to the
    /// view's nodes.
    ///
    /// Returns the sum of shortest costs to the reachable destinations
    /// (unreachable ones contribute zero) and, per reachable destination,
    /// the path in src→dest order. Ties between equal-cost relaxations
    /// resolve by heap insertion order.
    pub fn minimal_cost_path(
        &self,
        view: &[NodeId],
        src: &str,
        dests: &[NodeId],
    ) -> (f64, BTreeMap<NodeId, Vec<NodeId>>) {
        let unreached = f64::MAX / 2.0;
        let mut cost: BTreeMap<NodeId, f64> = view.iter().map(|n| (n.clone(), unreached)).collect();
        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        let mut parent: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        cost.insert(src.to_string(), 0.0);
        parent.insert(src.to_string(), PREV_NULL.to_string());

        // Smaller cost must pop first, so the priority is the negated cost.
        let mut queue = PriorityQueue::with_capacity(view.len());
        queue.push(
            CostPair {
                id: src.to_string(),
                cost: 0.0,
            },
            0.0,
        );
        while let Some(pair) = queue.pop() {
            visited.insert(pair.id.clone());
            let Some(out) = self.links.get(&pair.id) else {
                continue;
            };
            let here = pair.cost;
            for (next, link) in out {
                let Some(&known) = cost.get(next) else {
                    continue; // outside the view
                };
                if visited.contains(next) {
                    continue;
                }
                let relaxed = here + link.cost;
                if known > relaxed {
                    cost.insert(next.clone(), relaxed);
                    parent.insert(next.clone(), pair.id.clone());
                    queue.push(
                        CostPair {
                            id: next.clone(),
                            cost: relaxed,
                        },
                        -relaxed,
                    );
                }
            }
        }

        let mut total = 0.0;
        for dest in dests {
            if let Some(&c) = cost.get(dest) {
                if c != unreached {
                    total += c;
                }
            }
        }

        (total, structure_paths(&parent, dests))
    }

    // ── Pending-state mutators ──────────────────────────────────────

    pub fn inc_next_alloc(&mut self, nid: &str, typ: ResourceType, inc: f64) {
        debug_assert!(self.nodes.contains_key(nid), "unknown node {nid}");
        if let Some(slot) = self.nodes.get_mut(nid).and_then(|n| n.alloc.get_mut(&typ)) {
            *slot.pending_mut() += inc;
        }
    }

    pub fn dec_next_alloc(&mut self, nid: &str, typ: ResourceType, dec: f64) {
        debug_assert!(self.nodes.contains_key(nid), "unknown node {nid}");
        if let Some(slot) = self.nodes.get_mut(nid).and_then(|n| n.alloc.get_mut(&typ)) {
            *slot.pending_mut() -= dec;
        }
    }

    pub fn inc_all_next_alloc(&mut self, nid: &str, req: &BTreeMap<ResourceType, f64>) {
        for (&typ, &value) in req {
            self.inc_next_alloc(nid, typ, value);
        }
    }

    pub fn dec_all_next_alloc(&mut self, nid: &str, req: &BTreeMap<ResourceType, f64>) {
        for (&typ, &value) in req {
            self.dec_next_alloc(nid, typ, value);
        }
    }

    /// Recompute the pending utilization extremes of `nid` from its
    /// current pending allocations.
    pub fn update_next_gama(&mut self, nid: &str) {
        let Some(node) = self.nodes.get_mut(nid) else {
            return;
        };
        let mut spread = GamaSpread {
            max: 0.0,
            min: f64::MAX / 2.0,
        };
        for i in 0..node.res_types.len() {
            let typ = node.res_types[i];
            let gama = node.next_alloc(typ) / node.capa(typ);
            if gama > spread.max {
                spread.max = gama;
            }
            if gama < spread.min {
                spread.min = gama;
            }
        }
        node.gama.set_pending(spread);
    }

    /// Restore a previously snapshotted pending spread (speculative undo).
    pub fn restore_next_gama(&mut self, nid: &str, spread: GamaSpread) {
        if let Some(node) = self.nodes.get_mut(nid) {
            node.gama.set_pending(spread);
        }
    }

    /// Reserve bandwidth on `(from, to)` — and symmetrically on
    /// `(to, from)` — where those links exist. A self-loop reserves once;
    /// an absent link (including the not-placed sentinel as destination)
    /// is a silent no-op, so reservations only land toward neighbors that
    /// already have a real placement.
    pub fn inc_next_band_alloc(&mut self, from: &str, to: &str, inc: f64) {
        if let Some(link) = self.links.get_mut(from).and_then(|m| m.get_mut(to)) {
            *link.band.pending_mut() += inc;
        }
        if from != to {
            if let Some(link) = self.links.get_mut(to).and_then(|m| m.get_mut(from)) {
                *link.band.pending_mut() += inc;
            }
        }
    }

    pub fn dec_next_band_alloc(&mut self, from: &str, to: &str, dec: f64) {
        if let Some(link) = self.links.get_mut(from).and_then(|m| m.get_mut(to)) {
            *link.band.pending_mut() -= dec;
        }
        if from != to {
            if let Some(link) = self.links.get_mut(to).and_then(|m| m.get_mut(from)) {
                *link.band.pending_mut() -= dec;
            }
        }
    }

    // ── Commit / rollback ───────────────────────────────────────────

    pub fn rollback_alloc(&mut self) {
        for node in self.nodes.values_mut() {
            for slot in node.alloc.values_mut() {
                slot.rollback();
            }
        }
    }

    pub fn commit_alloc(&mut self) {
        for node in self.nodes.values_mut() {
            for slot in node.alloc.values_mut() {
                slot.commit();
            }
        }
    }

    pub fn rollback_gama(&mut self) {
        for node in self.nodes.values_mut() {
            node.gama.rollback();
        }
    }

    pub fn commit_gama(&mut self) {
        for node in self.nodes.values_mut() {
            node.gama.commit();
        }
    }

    pub fn rollback_band_alloc(&mut self) {
        for links in self.links.values_mut() {
            for link in links.values_mut() {
                link.band.rollback();
            }
        }
    }

    pub fn commit_band_alloc(&mut self) {
        for links in self.links.values_mut() {
            for link in links.values_mut() {
                link.band.commit();
            }
        }
    }

    /// Discard every pending reservation; invoked when a placement
    /// attempt fails.
    pub fn rollback_stat(&mut self) {
        self.rollback_alloc();
        self.rollback_gama();
        self.rollback_band_alloc();
    }

    /// Fold every pending reservation into committed state.
    pub fn commit_stat(&mut self) {
        self.commit_alloc();
        self.commit_gama();
        self.commit_band_alloc();
    }

    /// True when no pending state diverges from committed state.
    pub fn is_clean(&self) -> bool {
        self.nodes.values().all(Node::is_clean)
            && self
                .links
                .values()
                .flat_map(|m| m.values())
                .all(|l| l.band.is_clean())
    }
}

/// Rebuild src→dest paths from a Dijkstra parent map.
fn structure_paths(
    parent: &BTreeMap<NodeId, NodeId>,
    dests: &[NodeId],
) -> BTreeMap<NodeId, Vec<NodeId>> {
    let mut ret = BTreeMap::new();
    for dest in dests {
        if ret.contains_key(dest) || !parent.contains_key(dest) {
            continue;
        }
        let mut stack = Stack::new();
        stack.push(dest.clone());
        let mut cursor = dest;
        while let Some(prev) = parent.get(cursor) {
            if prev == PREV_NULL {
                break;
            }
            stack.push(prev.clone());
            cursor = prev;
        }
        let mut path = Vec::with_capacity(stack.len());
        while let Some(id) = stack.pop() {
            path.push(id);
        }
        ret.insert(dest.clone(), path);
    }
    ret
}
