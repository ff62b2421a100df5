//! Fiduccia–Mattheyses min-cut partitioning over a cluster view.
//!
//! Each node of the view becomes a cell. Hyperedges come from the full
//! link table: one edge per link source, containing the source and all of
//! its destinations. Because sub-cluster views share the master link
//! table, an edge may mention nodes outside the view; those are skipped
//! when scanning members but still count toward the edge's raw length,
//! which keeps such edges from ever reading as "entirely on one side".
//!
//! The initial gain of a cell is `fs + te`; after the first swap gains are
//! recomputed as `fs − te`. The asymmetry is deliberate and pinned by the
//! tests — do not unify the two formulas.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::cluster::Cluster;
use crate::types::NodeId;

/// The cell id recorded for the initial (pre-swap) partition record.
const INITIAL_CELL: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn flip(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug)]
struct Cell {
    side: Side,
    gain: i64,
    swapped: bool,
}

#[derive(Debug)]
struct Partition {
    max_gain: i64,
    max_gain_id: NodeId,
    cells: BTreeSet<NodeId>,
    /// Cells on this side not yet swapped.
    remain: usize,
}

impl Partition {
    fn new() -> Self {
        Self {
            max_gain: i64::MIN,
            max_gain_id: NodeId::new(),
            cells: BTreeSet::new(),
            remain: 0,
        }
    }

    fn snapshot(&self) -> Vec<NodeId> {
        self.cells.iter().cloned().collect()
    }
}

/// One step of the FM pass: the swapped cell, its gain, the running gain
/// sum, the resulting cut size, and both sides after the swap.
#[derive(Debug, Clone)]
pub struct PartitionRecord {
    pub cell: NodeId,
    pub gain: i64,
    pub sum_gain: i64,
    pub cut_size: usize,
    pub left: Vec<NodeId>,
    pub right: Vec<NodeId>,
}

/// FM working state for one partitioning run. Built fresh per invocation;
/// does not outlive it.
pub struct HyperGraph {
    cells: BTreeMap<NodeId, Cell>,
    edges: Vec<Vec<NodeId>>,
    edge_index: BTreeMap<NodeId, Vec<usize>>,
    left: Partition,
    right: Partition,
    records: Vec<PartitionRecord>,
    /// Minimum strictly positive cut size seen so far. Zero cuts are
    /// degenerate (one-sided) and never candidates.
    min_cut: Option<usize>,
    min_record_idx: Vec<usize>,
}

impl HyperGraph {
    /// Build the hypergraph for `view` against the cluster's link table
    /// and assign cells alternately left/right in id order.
    pub fn new(cluster: &Cluster, view: &[NodeId]) -> Self {
        let mut edges = Vec::new();
        let mut edge_index: BTreeMap<NodeId, Vec<usize>> = BTreeMap::new();
        for (from, out) in cluster.link_table() {
            if out.is_empty() {
                continue;
            }
            let idx = edges.len();
            let mut edge = Vec::with_capacity(out.len() + 1);
            edge_index.entry(from.clone()).or_default().push(idx);
            edge.push(from.clone());
            for to in out.keys() {
                edge_index.entry(to.clone()).or_default().push(idx);
                edge.push(to.clone());
            }
            edges.push(edge);
        }

        let mut cells = BTreeMap::new();
        let mut left = Partition::new();
        let mut right = Partition::new();
        for (count, nid) in view.iter().enumerate() {
            let side = if count % 2 == 0 {
                left.cells.insert(nid.clone());
                left.remain += 1;
                Side::Left
            } else {
                right.cells.insert(nid.clone());
                right.remain += 1;
                Side::Right
            };
            cells.insert(
                nid.clone(),
                Cell {
                    side,
                    gain: 0,
                    swapped: false,
                },
            );
        }

        let mut hpg = Self {
            cells,
            edges,
            edge_index,
            left,
            right,
            records: Vec::new(),
            min_cut: None,
            min_record_idx: Vec::new(),
        };
        let cut = hpg.cut_size();
        hpg.init_gains();
        hpg.records.push(PartitionRecord {
            cell: INITIAL_CELL.to_string(),
            gain: 0,
            sum_gain: 0,
            cut_size: cut,
            left: hpg.left.snapshot(),
            right: hpg.right.snapshot(),
        });
        if cut > 0 {
            hpg.min_cut = Some(cut);
            hpg.min_record_idx.push(0);
        }
        hpg
    }

    /// Run the FM pass to completion: every cell is swapped exactly once,
    /// and each swap appends a record.
    pub fn run(&mut self) {
        while self.left.remain != 0 || self.right.remain != 0 {
            let (swapped, affected) = self.select_and_swap();
            self.compute_gains(&affected);

            let record = self.build_record(&swapped);
            debug!(
                cell = %record.cell,
                gain = record.gain,
                cut_size = record.cut_size,
                "fm swap"
            );
            let idx = self.records.len();
            let cut = record.cut_size;
            self.records.push(record);
            if cut > 0 {
                match self.min_cut {
                    Some(min) if cut > min => {}
                    Some(min) if cut == min => self.min_record_idx.push(idx),
                    _ => {
                        self.min_cut = Some(cut);
                        self.min_record_idx = vec![idx];
                    }
                }
            }
        }
    }

    /// All records at the minimum positive cut size. When no swap (and no
    /// initial state) produced a positive cut — an edge-free view — the
    /// initial alternate partition is returned as the only candidate.
    pub fn min_cut_records(&self) -> Vec<&PartitionRecord> {
        if self.min_record_idx.is_empty() {
            return vec![&self.records[0]];
        }
        self.min_record_idx.iter().map(|&i| &self.records[i]).collect()
    }

    /// Every record of the pass, the initial state first.
    pub fn records(&self) -> &[PartitionRecord] {
        &self.records
    }

    /// Move the best cell from the fuller side, mark it swapped, and
    /// return it together with its not-yet-swapped co-members.
    fn select_and_swap(&mut self) -> (NodeId, Vec<NodeId>) {
        // Prefer draining the right partition on ties.
        let swap = if self.right.remain >= self.left.remain {
            let id = self.right.max_gain_id.clone();
            self.right.cells.remove(&id);
            self.left.cells.insert(id.clone());
            self.right.remain -= 1;
            id
        } else {
            let id = self.left.max_gain_id.clone();
            self.left.cells.remove(&id);
            self.right.cells.insert(id.clone());
            self.left.remain -= 1;
            id
        };
        if let Some(cell) = self.cells.get_mut(&swap) {
            cell.side = cell.side.flip();
            cell.swapped = true;
        }

        // Cells sharing a hyperedge with the swapped cell get their gains
        // recomputed; swapped cells are out of the game.
        let mut affected = Vec::new();
        let mut seen = BTreeSet::new();
        for &idx in self.edges_of(&swap) {
            for nid in &self.edges[idx] {
                let Some(cell) = self.cells.get(nid) else {
                    continue;
                };
                if nid != &swap && !cell.swapped && seen.insert(nid.clone()) {
                    affected.push(nid.clone());
                }
            }
        }

        // Re-derive each side's max over unswapped, unaffected cells; the
        // affected ones re-enter max tracking during their recompute.
        let (mut max, mut max_id) = (i64::MIN, self.left.max_gain_id.clone());
        for id in &self.left.cells {
            if seen.contains(id) {
                continue;
            }
            let cell = &self.cells[id];
            if !cell.swapped && cell.gain > max {
                max = cell.gain;
                max_id = id.clone();
            }
        }
        self.left.max_gain = max;
        self.left.max_gain_id = max_id;

        let (mut max, mut max_id) = (i64::MIN, self.right.max_gain_id.clone());
        for id in &self.right.cells {
            if seen.contains(id) {
                continue;
            }
            let cell = &self.cells[id];
            if !cell.swapped && cell.gain > max {
                max = cell.gain;
                max_id = id.clone();
            }
        }
        self.right.max_gain = max;
        self.right.max_gain_id = max_id;

        (swap, affected)
    }

    /// Initial gains: `fs + te`.
    fn init_gains(&mut self) {
        let ids: Vec<NodeId> = self.cells.keys().cloned().collect();
        for id in ids {
            let (fs, te) = self.fs_te(&id);
            let gain = fs + te;
            let side = self.cells[&id].side;
            if let Some(cell) = self.cells.get_mut(&id) {
                cell.gain = gain;
            }
            self.track_max(side, &id, gain);
        }
    }

    /// Post-swap gains for the affected cells: `fs − te`. Not the same
    /// formula as `init_gains`.
    fn compute_gains(&mut self, affected: &[NodeId]) {
        for id in affected {
            let (fs, te) = self.fs_te(id);
            let gain = fs - te;
            let Some(cell) = self.cells.get_mut(id) else {
                continue;
            };
            cell.gain = gain;
            let side = cell.side;
            self.track_max(side, id, gain);
        }
    }

    fn track_max(&mut self, side: Side, id: &NodeId, gain: i64) {
        let partition = match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        };
        if gain > partition.max_gain {
            partition.max_gain = gain;
            partition.max_gain_id = id.clone();
        }
    }

    /// Count, over the incident edges of `id`: `fs` — edges where `id` is
    /// the only member on its side; `te` — edges entirely on `id`'s side.
    /// `te` compares against the raw edge length, so edges with members
    /// outside the view never qualify.
    fn fs_te(&self, id: &NodeId) -> (i64, i64) {
        let side = self.cells[id].side;
        let mut fs = 0;
        let mut te = 0;
        for &idx in self.edges_of(id) {
            let edge = &self.edges[idx];
            let mut same_side = 1usize;
            for nid in edge {
                let Some(cell) = self.cells.get(nid) else {
                    continue;
                };
                if nid == id {
                    continue;
                }
                if cell.side == side {
                    same_side += 1;
                }
            }
            if same_side == 1 {
                fs += 1;
            }
            if same_side == edge.len() {
                te += 1;
            }
        }
        (fs, te)
    }

    fn edges_of(&self, id: &NodeId) -> &[usize] {
        self.edge_index.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of hyperedges with cell members on both sides.
    fn cut_size(&self) -> usize {
        let mut cut = 0;
        for edge in &self.edges {
            if edge.len() == 1 {
                continue;
            }
            let mut first: Option<Side> = None;
            for nid in edge {
                let Some(cell) = self.cells.get(nid) else {
                    continue;
                };
                match first {
                    None => first = Some(cell.side),
                    Some(side) if side != cell.side => {
                        cut += 1;
                        break;
                    }
                    Some(_) => {}
                }
            }
        }
        cut
    }

    fn build_record(&self, swap: &NodeId) -> PartitionRecord {
        let gain = self.cells[swap].gain;
        let prev_sum = self.records.last().map(|r| r.sum_gain).unwrap_or(0);
        PartitionRecord {
            cell: swap.clone(),
            gain,
            sum_gain: gain + prev_sum,
            cut_size: self.cut_size(),
            left: self.left.snapshot(),
            right: self.right.snapshot(),
        }
    }
}

/// Partition `view` and return all records sharing the minimum positive
/// cut size.
pub fn partition(cluster: &Cluster, view: &[NodeId]) -> Vec<PartitionRecord> {
    let mut hpg = HyperGraph::new(cluster, view);
    hpg.run();
    let records: Vec<PartitionRecord> = hpg.min_cut_records().into_iter().cloned().collect();
    debug!(
        candidates = records.len(),
        min_cut = records.first().map(|r| r.cut_size).unwrap_or(0),
        "fm partition finished"
    );
    records
}
