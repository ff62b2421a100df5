//! The application schedule queue.
//!
//! A read/write lock around the max-priority queue: push and pop take the
//! write lock, the emptiness check takes the read lock. Producers call
//! `push` from any thread; only the scheduling task pops.

use std::sync::{PoisonError, RwLock};

use motas_collections::PriorityQueue;
use motas_placement::Service;

/// Thread-safe priority queue of applications awaiting placement.
///
/// Applications pop in descending priority order; equal priorities pop in
/// push order, so a failed application demoted to the priority of an
/// already-waiting one goes behind it.
pub struct AppQueue {
    inner: RwLock<PriorityQueue<Service>>,
}

impl AppQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(PriorityQueue::with_capacity(capacity)),
        }
    }

    pub fn push(&self, app: Service) {
        let priority = app.priority() as f64;
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(app, priority);
    }

    pub fn pop(&self) -> Option<Service> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
