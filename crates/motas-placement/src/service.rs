//! Service profile — a microservice application as a call graph.
//!
//! A `Service` holds its microservices, the forward dependence map
//! (caller → callees) and its transpose, cached traversal orders, a
//! scheduling priority, and the two-phase placement state the engine
//! commits or rolls back as a unit.

use std::collections::BTreeMap;

use motas_collections::Queue;

use crate::types::{AppId, MsId, NodeId, ResourceType, TwoPhase, NOT_PLACED};

/// A unit of compute with resource requirements and a placement slot.
#[derive(Debug, Clone)]
pub struct Microservice {
    id: MsId,
    res_req: BTreeMap<ResourceType, f64>,
    place: TwoPhase<NodeId>,
}

impl Microservice {
    pub fn new(id: impl Into<MsId>, res_req: &[(ResourceType, f64)]) -> Self {
        Self {
            id: id.into(),
            res_req: res_req.iter().copied().collect(),
            place: TwoPhase::new(NOT_PLACED.to_string()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn res_req(&self) -> &BTreeMap<ResourceType, f64> {
        &self.res_req
    }

    /// The committed placement, or the not-placed sentinel.
    pub fn place_node(&self) -> &str {
        self.place.committed()
    }

    /// The pending placement, or the not-placed sentinel.
    pub fn next_place_node(&self) -> &str {
        self.place.pending()
    }

    pub fn is_placed(&self) -> bool {
        self.place.committed() != NOT_PLACED
    }
}

/// A directed call edge `um → dm` demanding `trans` bandwidth.
#[derive(Debug, Clone)]
pub struct Dependence {
    pub um_id: MsId,
    pub dm_id: MsId,
    pub trans: f64,
}

/// A microservice application: a rooted DAG of microservices.
#[derive(Debug, Clone)]
pub struct Service {
    id: AppId,
    root_id: MsId,
    ms: BTreeMap<MsId, Microservice>,
    /// Forward dependence map: caller → outgoing edges.
    dep: BTreeMap<MsId, Vec<Dependence>>,
    /// Transpose of `dep`: callee → incoming edges. Maintained by
    /// `add_dependence`, never written directly.
    re_dep: BTreeMap<MsId, Vec<Dependence>>,
    level_order: Option<Vec<MsId>>,
    topology_order: Option<Vec<MsId>>,
    priority: i64,
}

impl Service {
    pub fn new(id: impl Into<AppId>, root_id: impl Into<MsId>, priority: i64) -> Self {
        Self {
            id: id.into(),
            root_id: root_id.into(),
            ms: BTreeMap::new(),
            dep: BTreeMap::new(),
            re_dep: BTreeMap::new(),
            level_order: None,
            topology_order: None,
            priority,
        }
    }

    pub fn add_microservice(&mut self, ms: Microservice) {
        self.ms.insert(ms.id.clone(), ms);
        self.level_order = None;
        self.topology_order = None;
    }

    /// Record `um → dm` with the given bandwidth demand, keeping the
    /// reverse map in sync.
    pub fn add_dependence(&mut self, um: impl Into<MsId>, dm: impl Into<MsId>, trans: f64) {
        let edge = Dependence {
            um_id: um.into(),
            dm_id: dm.into(),
            trans,
        };
        self.re_dep
            .entry(edge.dm_id.clone())
            .or_default()
            .push(edge.clone());
        self.dep.entry(edge.um_id.clone()).or_default().push(edge);
        self.level_order = None;
        self.topology_order = None;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    /// Demote the application one step. No floor: negative priorities are
    /// legal and simply sort behind everything else in the queue.
    pub fn dec_priority(&mut self) {
        self.priority -= 1;
    }

    pub fn ms_count(&self) -> usize {
        self.ms.len()
    }

    pub fn microservice(&self, id: &str) -> Option<&Microservice> {
        self.ms.get(id)
    }

    pub fn microservices(&self) -> impl Iterator<Item = &Microservice> {
        self.ms.values()
    }

    pub fn ms_ids(&self) -> Vec<MsId> {
        self.ms.keys().cloned().collect()
    }

    /// Outgoing edges of `id`; empty when it calls nothing.
    pub fn deps_of(&self, id: &str) -> &[Dependence] {
        self.dep.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incoming edges of `id`; empty when nothing calls it.
    pub fn re_deps_of(&self, id: &str) -> &[Dependence] {
        self.re_dep.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topological order from callees toward the root caller.
    ///
    /// Kahn's algorithm over the reverse dependence map, cached until the
    /// microservice set changes. When the graph has a cycle the returned
    /// order is shorter than the microservice count — callers can detect
    /// that and refuse the application.
    pub fn topology_order(&mut self) -> &[MsId] {
        let stale = self
            .topology_order
            .as_ref()
            .map(|o| o.len() != self.ms.len())
            .unwrap_or(true);
        if stale {
            self.topology_order = Some(self.topology_travel());
        }
        self.topology_order.as_deref().unwrap_or(&[])
    }

    fn topology_travel(&self) -> Vec<MsId> {
        // When A calls B, B must come first: count reverse edges as
        // in-edges of the caller. Microservices with no edges at all sit
        // at in-degree zero.
        let mut in_degree: BTreeMap<MsId, usize> = self.ms.keys().map(|id| (id.clone(), 0)).collect();
        for deps in self.re_dep.values() {
            for dep in deps {
                in_degree.entry(dep.dm_id.clone()).or_default();
                *in_degree.entry(dep.um_id.clone()).or_default() += 1;
            }
        }

        let mut order = Vec::with_capacity(self.ms.len());
        let mut queue = Queue::with_capacity(self.ms.len());
        for (id, &degree) in &in_degree {
            if degree == 0 {
                queue.push(id.clone());
            }
        }
        while let Some(mid) = queue.pop() {
            order.push(mid.clone());
            for dep in self.re_deps_of(&mid) {
                if let Some(degree) = in_degree.get_mut(&dep.um_id) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(dep.um_id.clone());
                    }
                }
            }
        }
        order
    }

    /// Breadth-first order from the root along forward dependences.
    /// Diagnostics only; the engine schedules by `topology_order`.
    pub fn level_order(&mut self) -> &[MsId] {
        let stale = self
            .level_order
            .as_ref()
            .map(|o| o.len() != self.ms.len())
            .unwrap_or(true);
        if stale {
            self.level_order = Some(self.level_travel());
        }
        self.level_order.as_deref().unwrap_or(&[])
    }

    fn level_travel(&self) -> Vec<MsId> {
        let mut order = Vec::with_capacity(self.ms.len());
        let mut queue = Queue::with_capacity(self.ms.len());
        queue.push(self.root_id.clone());
        while let Some(mid) = queue.pop() {
            for dep in self.deps_of(&mid) {
                queue.push(dep.dm_id.clone());
            }
            order.push(mid);
        }
        order
    }

    // ── Two-phase placement state ───────────────────────────────────

    pub fn set_next_place_node(&mut self, mid: &str, nid: &str) {
        if let Some(ms) = self.ms.get_mut(mid) {
            ms.place.set_pending(nid.to_string());
        }
    }

    /// Discard pending placements; invoked when an attempt fails.
    pub fn rollback_place_stat(&mut self) {
        for ms in self.ms.values_mut() {
            ms.place.rollback();
        }
    }

    /// Fold pending placements into committed state.
    pub fn commit_place_stat(&mut self) {
        for ms in self.ms.values_mut() {
            ms.place.commit();
        }
    }

    /// True when no pending placement diverges from its committed value.
    pub fn is_clean(&self) -> bool {
        self.ms.values().all(|ms| ms.place.is_clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root 0 → {1, 2}; 1 → {3, 4}; 2 → {5}.
    fn tree_app() -> Service {
        let mut app = Service::new("app", "0", 5);
        for id in ["0", "1", "2", "3", "4", "5"] {
            app.add_microservice(Microservice::new(id, &[(ResourceType::Cpu, 1.0)]));
        }
        app.add_dependence("0", "1", 1.0);
        app.add_dependence("0", "2", 1.0);
        app.add_dependence("1", "3", 1.0);
        app.add_dependence("1", "4", 1.0);
        app.add_dependence("2", "5", 1.0);
        app
    }

    #[test]
    fn level_order_is_breadth_first_from_root() {
        let mut app = tree_app();
        assert_eq!(app.level_order(), ["0", "1", "2", "3", "4", "5"]);
    }

    #[test]
    fn topology_order_puts_callees_before_callers() {
        let mut app = tree_app();
        let order = app.topology_order().to_vec();

        assert_eq!(order.len(), 6);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        for leaf in ["3", "4", "5"] {
            assert!(pos(leaf) < pos("1"));
            assert!(pos(leaf) < pos("2"));
        }
        assert!(pos("1") < pos("0"));
        assert!(pos("2") < pos("0"));
    }

    #[test]
    fn topology_order_has_no_duplicates() {
        let mut app = tree_app();
        let order = app.topology_order().to_vec();
        let mut dedup = order.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), order.len());
    }

    #[test]
    fn cyclic_graph_yields_short_order() {
        let mut app = Service::new("app", "a", 5);
        for id in ["a", "b"] {
            app.add_microservice(Microservice::new(id, &[(ResourceType::Cpu, 1.0)]));
        }
        app.add_dependence("a", "b", 1.0);
        app.add_dependence("b", "a", 1.0);

        assert!(app.topology_order().len() < app.ms_count());
    }

    #[test]
    fn isolated_microservice_appears_in_topology_order() {
        let mut app = Service::new("app", "solo", 5);
        app.add_microservice(Microservice::new("solo", &[(ResourceType::Cpu, 1.0)]));

        assert_eq!(app.topology_order(), ["solo"]);
    }

    #[test]
    fn re_dep_is_the_transpose_of_dep() {
        let app = tree_app();
        for (um, deps) in &app.dep {
            for dep in deps {
                assert!(app
                    .re_deps_of(&dep.dm_id)
                    .iter()
                    .any(|r| &r.um_id == um && r.trans == dep.trans));
            }
        }
    }

    #[test]
    fn placement_state_commits_and_rolls_back() {
        let mut app = tree_app();
        app.set_next_place_node("0", "node0");
        assert_eq!(app.microservice("0").unwrap().next_place_node(), "node0");
        assert!(!app.microservice("0").unwrap().is_placed());
        assert!(!app.is_clean());

        app.rollback_place_stat();
        assert_eq!(app.microservice("0").unwrap().next_place_node(), NOT_PLACED);
        assert!(app.is_clean());

        app.set_next_place_node("0", "node1");
        app.commit_place_stat();
        assert_eq!(app.microservice("0").unwrap().place_node(), "node1");
        assert!(app.microservice("0").unwrap().is_placed());
    }

    #[test]
    fn priority_can_go_negative() {
        let mut app = Service::new("app", "0", 0);
        app.dec_priority();
        assert_eq!(app.priority(), -1);
    }

    #[test]
    fn order_cache_invalidates_when_graph_grows() {
        let mut app = tree_app();
        let before = app.topology_order().len();
        app.add_microservice(Microservice::new("6", &[(ResourceType::Cpu, 1.0)]));
        app.add_dependence("2", "6", 1.0);
        let after = app.topology_order().len();
        assert_eq!(before + 1, after);
    }
}
