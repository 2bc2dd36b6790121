//! The road network: a typed graph of intersections and directed road
//! segments, with live per-segment congestion attributes.

use crate::error::SimError;
use crate::{IntersectionId, IntersectionSet, Point2d, SegmentId, SegmentSet};
use cgmath::MetricSpace;
use itertools::Itertools;
use pathfinding::directed::dijkstra::dijkstra;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Fixed-point scale applied to segment costs so Dijkstra can use integer weights.
const COST_SCALE: f64 = 100.0;

/// An intersection (node) of the road network.
///
/// Topology is immutable once the network is built; only the congestion
/// attributes of the segments around it change.
#[derive(Clone, Debug)]
pub struct Intersection {
    /// The identifier assigned by the network data provider.
    ext_id: u64,
    /// World position of the intersection.
    position: Point2d,
    /// Incoming segments, grouped here as the intersection's approaches.
    approaches: SmallVec<[SegmentId; 4]>,
    /// Outgoing segments.
    exits: SmallVec<[SegmentId; 4]>,
}

impl Intersection {
    /// The provider-assigned identifier.
    pub fn ext_id(&self) -> u64 {
        self.ext_id
    }

    /// World position of the intersection.
    pub fn position(&self) -> Point2d {
        self.position
    }

    /// The segments arriving at this intersection.
    pub fn approaches(&self) -> &[SegmentId] {
        &self.approaches
    }

    /// The segments leaving this intersection.
    pub fn exits(&self) -> &[SegmentId] {
        &self.exits
    }
}

/// A directed road segment (edge) between two intersections.
#[derive(Clone, Debug)]
pub struct RoadSegment {
    /// Tail intersection.
    from: IntersectionId,
    /// Head intersection.
    to: IntersectionId,
    /// Length in m.
    length: f64,
    /// Free-flow speed in m/s.
    free_flow_speed: f64,
    /// Maximum number of vehicles concurrently on the segment.
    capacity: u32,
    /// Congestion level in [0, 1]; 0 is free flow, 1 is fully jammed.
    congestion: f64,
    /// Step at which `congestion` was last refreshed by the feed.
    updated_at: Option<u64>,
    /// Number of vehicles currently on the segment.
    occupancy: u32,
}

impl RoadSegment {
    /// Tail intersection of the segment.
    pub fn from(&self) -> IntersectionId {
        self.from
    }

    /// Head intersection of the segment.
    pub fn to(&self) -> IntersectionId {
        self.to
    }

    /// Length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Free-flow speed in m/s.
    pub fn free_flow_speed(&self) -> f64 {
        self.free_flow_speed
    }

    /// Maximum number of vehicles concurrently on the segment.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Current congestion level in [0, 1].
    pub fn congestion(&self) -> f64 {
        self.congestion
    }

    /// Number of vehicles currently on the segment.
    pub fn occupancy(&self) -> u32 {
        self.occupancy
    }

    /// Step at which the congestion level was last refreshed, if ever.
    pub fn last_congestion_update(&self) -> Option<u64> {
        self.updated_at
    }
}

/// A node as delivered by the road-network data provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeData {
    pub id: u64,
    pub position: Point2d,
}

/// An edge as delivered by the road-network data provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeData {
    pub from: u64,
    pub to: u64,
    /// Length in m; derived from the endpoint positions when absent.
    pub length: Option<f64>,
    /// Free-flow speed in m/s.
    pub free_flow_speed: f64,
    /// Maximum number of vehicles concurrently on the segment.
    pub capacity: u32,
}

/// The raw payload of a road-network data provider, prior to validation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkData {
    pub nodes: Vec<NodeData>,
    pub edges: Vec<EdgeData>,
}

impl NetworkData {
    /// Builds a synthetic rectangular grid with bidirectional streets,
    /// `spacing` metres apart. Useful for tests and training runs that
    /// don't depend on provider data.
    pub fn grid(rows: usize, cols: usize, spacing: f64, capacity: u32) -> Self {
        let mut nodes = Vec::with_capacity(rows * cols);
        let mut edges = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                nodes.push(NodeData {
                    id: (row * cols + col) as u64,
                    position: Point2d::new(col as f64 * spacing, row as f64 * spacing),
                });
            }
        }
        let mut connect = |a: u64, b: u64| {
            for (from, to) in [(a, b), (b, a)] {
                edges.push(EdgeData {
                    from,
                    to,
                    length: Some(spacing),
                    free_flow_speed: 1.0,
                    capacity,
                });
            }
        };
        for row in 0..rows {
            for col in 0..cols {
                let id = (row * cols + col) as u64;
                if col + 1 < cols {
                    connect(id, id + 1);
                }
                if row + 1 < rows {
                    connect(id, id + cols as u64);
                }
            }
        }
        Self { nodes, edges }
    }
}

/// The road network of one simulated place.
pub struct RoadNetwork {
    intersections: IntersectionSet,
    segments: SegmentSet,
    by_ext: HashMap<u64, IntersectionId>,
}

impl RoadNetwork {
    /// Validates provider data and builds the network from it.
    ///
    /// Fails with [SimError::InvalidNetwork] on an empty node set, duplicate
    /// node ids, dangling edge endpoints, or non-positive segment attributes.
    /// A provider failure must never surface as a silently empty network.
    pub fn from_data(data: NetworkData) -> Result<Self, SimError> {
        if data.nodes.is_empty() {
            return Err(SimError::InvalidNetwork("network has no intersections".into()));
        }

        let mut intersections = IntersectionSet::with_key();
        let mut by_ext = HashMap::with_capacity(data.nodes.len());
        for node in &data.nodes {
            let id = intersections.insert(Intersection {
                ext_id: node.id,
                position: node.position,
                approaches: SmallVec::new(),
                exits: SmallVec::new(),
            });
            if by_ext.insert(node.id, id).is_some() {
                return Err(SimError::InvalidNetwork(format!(
                    "duplicate intersection id {}",
                    node.id
                )));
            }
        }

        let mut segments = SegmentSet::with_key();
        for edge in &data.edges {
            let from = *by_ext.get(&edge.from).ok_or_else(|| {
                SimError::InvalidNetwork(format!("edge references unknown node {}", edge.from))
            })?;
            let to = *by_ext.get(&edge.to).ok_or_else(|| {
                SimError::InvalidNetwork(format!("edge references unknown node {}", edge.to))
            })?;
            let length = edge.length.unwrap_or_else(|| {
                intersections[from].position.distance(intersections[to].position)
            });
            if length <= 0.0 {
                return Err(SimError::InvalidNetwork(format!(
                    "segment {} -> {} has non-positive length",
                    edge.from, edge.to
                )));
            }
            if edge.free_flow_speed <= 0.0 {
                return Err(SimError::InvalidNetwork(format!(
                    "segment {} -> {} has non-positive free-flow speed",
                    edge.from, edge.to
                )));
            }
            if edge.capacity == 0 {
                return Err(SimError::InvalidNetwork(format!(
                    "segment {} -> {} has zero capacity",
                    edge.from, edge.to
                )));
            }
            let id = segments.insert(RoadSegment {
                from,
                to,
                length,
                free_flow_speed: edge.free_flow_speed,
                capacity: edge.capacity,
                congestion: 0.0,
                updated_at: None,
                occupancy: 0,
            });
            intersections[from].exits.push(id);
            intersections[to].approaches.push(id);
        }

        Ok(Self {
            intersections,
            segments,
            by_ext,
        })
    }

    /// Number of intersections in the network.
    pub fn intersection_count(&self) -> usize {
        self.intersections.len()
    }

    /// Number of segments in the network.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Gets a reference to the intersection with the given ID.
    pub fn intersection(&self, id: IntersectionId) -> &Intersection {
        &self.intersections[id]
    }

    /// Gets a reference to the segment with the given ID.
    pub fn segment(&self, id: SegmentId) -> &RoadSegment {
        &self.segments[id]
    }

    /// Looks an intersection up by its provider-assigned identifier.
    pub fn intersection_by_ext(&self, ext_id: u64) -> Option<IntersectionId> {
        self.by_ext.get(&ext_id).copied()
    }

    /// Returns an iterator over all the intersections in the network.
    pub fn intersections(&self) -> impl Iterator<Item = (IntersectionId, &Intersection)> {
        self.intersections.iter()
    }

    /// Returns an iterator over all the segments in the network.
    pub fn segments(&self) -> impl Iterator<Item = (SegmentId, &RoadSegment)> {
        self.segments.iter()
    }

    /// The segments leaving the given intersection.
    pub fn neighbors(&self, id: IntersectionId) -> &[SegmentId] {
        &self.intersections[id].exits
    }

    /// The segments arriving at the given intersection.
    pub fn approaches(&self, id: IntersectionId) -> &[SegmentId] {
        &self.intersections[id].approaches
    }

    /// Refreshes a segment's congestion level from the external feed,
    /// clamped to [0, 1], and stamps it for staleness tracking.
    pub fn update_congestion(&mut self, id: SegmentId, level: f64, step: u64) {
        let segment = &mut self.segments[id];
        segment.congestion = level.clamp(0.0, 1.0);
        segment.updated_at = Some(step);
    }

    /// Whether a segment's congestion reading is older than `threshold`
    /// steps (or has never been refreshed at all).
    pub fn congestion_is_stale(&self, id: SegmentId, now: u64, threshold: u64) -> bool {
        match self.segments[id].updated_at {
            Some(at) => now.saturating_sub(at) > threshold,
            None => true,
        }
    }

    /// Finds the cheapest route between two intersections, weighted by
    /// segment length inflated by current congestion.
    ///
    /// Returns the ordered segment ids of the route, which is empty when
    /// origin and destination coincide. Fails with [SimError::NoRoute] when
    /// the destination is unreachable.
    pub fn shortest_route(
        &self,
        origin: IntersectionId,
        destination: IntersectionId,
        congestion_weight: f64,
    ) -> Result<Vec<SegmentId>, SimError> {
        if origin == destination {
            return Ok(vec![]);
        }

        let result = dijkstra(
            &origin,
            |id| {
                self.intersections[*id]
                    .exits
                    .iter()
                    .map(|sid| {
                        let segment = &self.segments[*sid];
                        (segment.to, self.route_cost(*sid, congestion_weight))
                    })
                    .collect::<Vec<_>>()
            },
            |id| *id == destination,
        );
        let (path, _) = result.ok_or(SimError::NoRoute {
            origin,
            destination,
        })?;

        // Pick the cheapest segment for every hop; parallel edges between the
        // same pair of intersections are allowed.
        let mut route = Vec::with_capacity(path.len().saturating_sub(1));
        for (u, v) in path.iter().tuple_windows() {
            let segment = self.intersections[*u]
                .exits
                .iter()
                .filter(|sid| self.segments[**sid].to == *v)
                .min_by_key(|sid| self.route_cost(**sid, congestion_weight))
                .copied()
                .ok_or(SimError::NoRoute {
                    origin,
                    destination,
                })?;
            route.push(segment);
        }
        Ok(route)
    }

    /// Effective routing cost of a segment as a fixed-point integer.
    fn route_cost(&self, id: SegmentId, congestion_weight: f64) -> u64 {
        let segment = &self.segments[id];
        let cost = segment.length * (1.0 + congestion_weight * segment.congestion);
        (cost * COST_SCALE) as u64
    }

    /// Admits a vehicle onto the segment, unless it is at capacity.
    pub(crate) fn try_enter(&mut self, id: SegmentId) -> bool {
        let segment = &mut self.segments[id];
        if segment.occupancy < segment.capacity {
            segment.occupancy += 1;
            true
        } else {
            false
        }
    }

    /// Releases a vehicle from the segment.
    pub(crate) fn leave(&mut self, id: SegmentId) {
        let segment = &mut self.segments[id];
        debug_assert!(segment.occupancy > 0, "leave() on an empty segment");
        segment.occupancy = segment.occupancy.saturating_sub(1);
    }

    /// Clears all segment occupancy, used when the engine resets.
    pub(crate) fn clear_occupancy(&mut self) {
        for segment in self.segments.values_mut() {
            segment.occupancy = 0;
        }
    }
}
