//! Placement error taxonomy.

use thiserror::Error;

/// Errors that can abort a placement attempt.
///
/// `OutOfResources` is the only in-band error: no node on either side of a
/// partition can host a microservice under the capacity check. The engine
/// responds with rollback and a demoted requeue, so it is transient from
/// the caller's point of view.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("out of resources: no node can host microservice {ms_id}")]
    OutOfResources { ms_id: String },
}
