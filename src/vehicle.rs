//! Vehicles and their routes.

use crate::{IntersectionId, SegmentId, VehicleId};

/// A simulated vehicle following a fixed route through the network.
///
/// The route is computed once at spawn time; `leg` and `progress` track
/// how far along it the vehicle is. Vehicles are owned exclusively by the
/// simulation engine for their whole lifetime.
#[derive(Clone, Debug)]
pub struct Vehicle {
    id: VehicleId,
    origin: IntersectionId,
    destination: IntersectionId,
    /// Ordered segment ids from origin to destination.
    route: Vec<SegmentId>,
    /// Index of the segment the vehicle is currently on.
    leg: usize,
    /// Fraction of the current segment travelled, in [0, 1].
    progress: f64,
    /// Step at which the vehicle was created.
    spawned_at: u64,
    /// Step at which the vehicle reached its destination, if it has.
    completed_at: Option<u64>,
    /// Whether the vehicle is currently held at the end of its segment.
    waiting: bool,
    /// Total steps spent waiting at signals or full segments.
    wait_steps: u64,
}

impl Vehicle {
    pub(crate) fn new(
        id: VehicleId,
        origin: IntersectionId,
        destination: IntersectionId,
        route: Vec<SegmentId>,
        spawned_at: u64,
    ) -> Self {
        debug_assert!(!route.is_empty(), "a vehicle needs at least one route leg");
        Self {
            id,
            origin,
            destination,
            route,
            leg: 0,
            progress: 0.0,
            spawned_at,
            completed_at: None,
            waiting: false,
            wait_steps: 0,
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The intersection the vehicle departed from.
    pub fn origin(&self) -> IntersectionId {
        self.origin
    }

    /// The intersection the vehicle is heading for.
    pub fn destination(&self) -> IntersectionId {
        self.destination
    }

    /// The vehicle's route as ordered segment ids.
    pub fn route(&self) -> &[SegmentId] {
        &self.route
    }

    /// The segment the vehicle is currently on.
    pub fn current_segment(&self) -> SegmentId {
        self.route[self.leg]
    }

    /// The next segment on the route, if any legs remain.
    pub fn next_segment(&self) -> Option<SegmentId> {
        self.route.get(self.leg + 1).copied()
    }

    /// Fraction of the current segment travelled, in [0, 1].
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Whether the vehicle is on the last leg of its route.
    pub fn on_final_leg(&self) -> bool {
        self.leg + 1 == self.route.len()
    }

    /// Whether the vehicle is held at the end of its segment, queued at
    /// the downstream intersection.
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Total steps spent waiting so far.
    pub fn wait_steps(&self) -> u64 {
        self.wait_steps
    }

    /// Step at which the vehicle was created.
    pub fn spawned_at(&self) -> u64 {
        self.spawned_at
    }

    /// Step at which the vehicle completed its trip, if it has.
    pub fn completed_at(&self) -> Option<u64> {
        self.completed_at
    }

    /// Moves the vehicle along its current segment, clamped so it never
    /// overshoots the segment end within a single step. Returns `true`
    /// once the vehicle sits at the end of the segment.
    pub(crate) fn advance(&mut self, fraction: f64) -> bool {
        self.progress = (self.progress + fraction).min(1.0);
        self.progress >= 1.0
    }

    /// Crosses the intersection onto the next leg of the route.
    pub(crate) fn enter_next_leg(&mut self) {
        debug_assert!(!self.on_final_leg());
        self.leg += 1;
        self.progress = 0.0;
        self.waiting = false;
    }

    /// Marks the trip as finished.
    pub(crate) fn complete(&mut self, step: u64) {
        self.completed_at = Some(step);
        self.waiting = false;
    }

    /// Records one step spent held at the end of the current segment.
    pub(crate) fn hold(&mut self) {
        self.waiting = true;
        self.wait_steps += 1;
    }

    /// Clears the waiting flag once the vehicle is moving again.
    pub(crate) fn clear_waiting(&mut self) {
        self.waiting = false;
    }
}
