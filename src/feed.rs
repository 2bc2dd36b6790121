//! Boundaries to the out-of-core data collaborators: the road-network
//! provider queried once at construction, and the live traffic feed polled
//! between steps.
//!
//! Both run asynchronously relative to the simulation; the core never
//! blocks on them and treats their data as eventually consistent.

use crate::error::SimError;
use crate::network::NetworkData;
use crate::SegmentId;

/// A provider of road-network topology for a named place.
///
/// Failure (place not found, transport error) must surface as a typed
/// error, never as a silently empty network.
pub trait NetworkSource {
    fn load(&mut self, place: &str) -> Result<NetworkData, SimError>;
}

/// One congestion reading delivered by the live traffic feed.
#[derive(Clone, Copy, Debug)]
pub struct CongestionUpdate {
    pub segment: SegmentId,
    /// Congestion level in [0, 1].
    pub level: f64,
}

/// A periodic source of per-segment congestion readings.
///
/// Segments missing from a poll keep their previous level; a failed poll
/// degrades the simulation (stale data) but never stops it.
pub trait CongestionFeed {
    fn poll(&mut self) -> Result<Vec<CongestionUpdate>, SimError>;
}

/// Normalises a (current speed, free-flow speed) reading into a congestion
/// level: 0 at free flow, 1 at standstill. A non-positive free-flow speed
/// reads as fully congested.
pub fn congestion_from_speeds(current: f64, free_flow: f64) -> f64 {
    if free_flow <= 0.0 {
        return 1.0;
    }
    (1.0 - current / free_flow).clamp(0.0, 1.0)
}
