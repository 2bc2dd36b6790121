pub use agent::{AgentParams, FixedCycle, Policy, QLearningAgent, QTableSnapshot, StateKey};
pub use config::{DashboardCommand, SimConfig, SignalTiming};
pub use error::SimError;
pub use feed::{congestion_from_speeds, CongestionFeed, CongestionUpdate, NetworkSource};
pub use network::{EdgeData, Intersection, NetworkData, NodeData, RoadNetwork, RoadSegment};
pub use signal::{Phase, SignalController, SignalState};
pub use simulation::{SignalPhaseInfo, SimulationEngine, StepMetrics};
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use vehicle::Vehicle;

mod agent;
mod config;
mod error;
mod feed;
mod network;
mod signal;
mod simulation;
mod vehicle;

new_key_type! {
    /// Unique ID of an [Intersection].
    pub struct IntersectionId;
    /// Unique ID of a [RoadSegment].
    pub struct SegmentId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
}

type IntersectionSet = SlotMap<IntersectionId, Intersection>;
type SegmentSet = SlotMap<SegmentId, RoadSegment>;
type VehicleSet = SlotMap<VehicleId, Vehicle>;

/// A 2D point, used for intersection positions.
pub type Point2d = cgmath::Point2<f64>;
