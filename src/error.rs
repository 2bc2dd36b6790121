//! The error taxonomy of the simulation core.

use crate::IntersectionId;
use thiserror::Error;

/// Errors raised by the simulation core and its collaborator boundaries.
///
/// Capacity limits are deliberately absent: a full segment causes vehicles
/// to queue, it is never an error condition.
#[derive(Debug, Error)]
pub enum SimError {
    /// No path exists between the two intersections. Callers discard the
    /// affected spawn request and carry on.
    #[error("no route from {origin:?} to {destination:?}")]
    NoRoute {
        origin: IntersectionId,
        destination: IntersectionId,
    },

    /// The road network is empty or malformed. Fatal: the simulation
    /// refuses to start.
    #[error("invalid road network: {0}")]
    InvalidNetwork(String),

    /// The live traffic feed could not be reached. Non-fatal: the last
    /// known congestion values stay in effect.
    #[error("traffic feed unavailable: {0}")]
    DataFeed(String),

    /// A configuration value or dashboard command is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
