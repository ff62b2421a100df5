//! Shared ids, sentinels, resource types, and the two-phase scalar.

use serde::{Deserialize, Serialize};

/// Identifies a microservice application.
pub type AppId = String;

/// Identifies a microservice within an application.
pub type MsId = String;

/// Identifies a worker node in the cluster.
pub type NodeId = String;

/// Placement sentinel: the microservice is not on any worker node.
pub const NOT_PLACED: &str = "-1";

/// Shortest-path sentinel: the node has no predecessor on the path.
pub const PREV_NULL: &str = "-1";

pub const KB: f64 = 1024.0;
pub const MB: f64 = 1024.0 * KB;
pub const GB: f64 = 1024.0 * MB;
pub const TB: f64 = 1024.0 * GB;

/// A resource dimension a node exposes and a microservice demands.
///
/// The set in play must be enumerated up-front: a node's `res_types` list
/// fixes which dimensions participate in its utilization extremes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cpu,
    Mem,
    Net,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Cpu => write!(f, "cpu"),
            ResourceType::Mem => write!(f, "mem"),
            ResourceType::Net => write!(f, "net"),
        }
    }
}

/// A committed/pending pair with single-operation commit and rollback.
///
/// Every mutable reservation field in the cluster and service profiles is
/// one of these: mutations during a scheduling attempt touch only the
/// pending copy, `commit` folds pending into committed on success, and
/// `rollback` restores pending from committed on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoPhase<T: Clone> {
    committed: T,
    pending: T,
}

impl<T: Clone> TwoPhase<T> {
    /// Start with both copies equal to `value`.
    pub fn new(value: T) -> Self {
        Self {
            committed: value.clone(),
            pending: value,
        }
    }

    pub fn committed(&self) -> &T {
        &self.committed
    }

    pub fn pending(&self) -> &T {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut T {
        &mut self.pending
    }

    pub fn set_pending(&mut self, value: T) {
        self.pending = value;
    }

    /// committed ← pending.
    pub fn commit(&mut self) {
        self.committed = self.pending.clone();
    }

    /// pending ← committed.
    pub fn rollback(&mut self) {
        self.pending = self.committed.clone();
    }

    /// True when pending and committed agree.
    pub fn is_clean(&self) -> bool
    where
        T: PartialEq,
    {
        self.committed == self.pending
    }
}
