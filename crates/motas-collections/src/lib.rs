//! motas-collections — primitive containers for the MOTAS scheduler.
//!
//! Three small generic containers:
//!
//! - [`PriorityQueue`] — max-heap keyed by an `f64` priority, FIFO on ties
//! - [`Queue`] — unbounded FIFO queue
//! - [`Stack`] — LIFO stack with `top()` inspection
//!
//! The priority queue backs both the application schedule queue and the
//! Dijkstra relaxation queue (with negated costs), as two separate
//! instantiations.

pub mod priority_queue;
pub mod queue;
pub mod stack;

pub use priority_queue::PriorityQueue;
pub use queue::Queue;
pub use stack::Stack;
