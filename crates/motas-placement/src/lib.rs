//! motas-placement — the domain model of the MOTAS scheduler.
//!
//! This crate holds everything the placement engine reasons about, but no
//! scheduling policy of its own:
//!
//! - **`cluster`** — worker nodes, directed links, two-phase resource
//!   reservation, candidate filtering, and shortest-path queries
//! - **`service`** — microservice call graphs with derived orderings and
//!   two-phase placement state
//! - **`hypergraph`** — the Fiduccia–Mattheyses min-cut partitioner run
//!   over a cluster view
//! - **`types`** — ids, sentinels, resource types, and the two-phase
//!   scalar that commit/rollback are built on
//!
//! All domain maps are `BTreeMap`, so any iteration over nodes, links, or
//! microservices is ordered by id. Callers (and tests) may rely on that.

pub mod cluster;
pub mod error;
pub mod hypergraph;
pub mod service;
pub mod types;

pub use cluster::{Cluster, GamaSpread, Link, Node, DEFAULT_ARG_WEIGHT, DEFAULT_THRESHOLD};
pub use error::PlacementError;
pub use hypergraph::{HyperGraph, PartitionRecord};
pub use service::{Dependence, Microservice, Service};
pub use types::{AppId, MsId, NodeId, ResourceType, TwoPhase, NOT_PLACED, PREV_NULL};
