//! motas-scheduler — the MOTAS placement engine and its orchestration loop.
//!
//! MOTAS maps microservice applications onto a cluster by recursive
//! divide-and-conquer: the node set is split with an FM min-cut partition,
//! the microservice set is split across the two halves by a utility score
//! (link cost, bandwidth interference, resource fragmentation), and the
//! recursion bottoms out by reserving resources on single-node views. A
//! priority queue drives retries: an application that cannot be placed is
//! rolled back and requeued one priority step lower.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (handle)
//!   ├── AppQueue (priority queue of applications)
//!   ├── kill flag (atomic, cooperative)
//!   ├── placements snapshot (committed ms → node, behind its own lock)
//!   └── scheduling task (owns the PlacementEngine)
//!       ├── PlacementEngine (cluster + registered applications)
//!       └── optional apply hook (cluster-manager integration point)
//! ```

pub mod app_queue;
pub mod config;
pub mod engine;
pub mod scheduler;

pub use app_queue::AppQueue;
pub use config::SchedulerConfig;
pub use engine::{PlacementEngine, PlacementMapping, ScoreWeights};
pub use scheduler::{ApplyCallback, ApplyFuture, Scheduler};
