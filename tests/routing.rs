//! Tests for route computation over the road network.

use itertools::Itertools;
use traffic_rl::{
    EdgeData, IntersectionId, NetworkData, NodeData, Point2d, RoadNetwork, SegmentId, SimConfig,
    SimError, SimulationEngine,
};

fn node(network: &RoadNetwork, ext_id: u64) -> IntersectionId {
    network.intersection_by_ext(ext_id).unwrap()
}

fn segment_between(network: &RoadNetwork, from: u64, to: u64) -> SegmentId {
    network
        .segments()
        .find(|(_, s)| {
            network.intersection(s.from()).ext_id() == from
                && network.intersection(s.to()).ext_id() == to
        })
        .map(|(id, _)| id)
        .unwrap()
}

/// Every spawned vehicle's route must be contiguous in the graph: each
/// segment starts where the previous one ended.
#[test]
fn spawned_routes_are_contiguous() {
    let network = RoadNetwork::from_data(NetworkData::grid(3, 3, 100.0, 10)).unwrap();
    let config = SimConfig {
        spawn_rate: 0.0,
        ..Default::default()
    };
    let mut engine = SimulationEngine::new(network, config).unwrap();

    for _ in 0..10 {
        engine.spawn_vehicles(3.0);
        engine.step();
    }

    assert!(engine.vehicles().count() > 0);
    for vehicle in engine.vehicles() {
        let network = engine.network();
        assert!(vehicle
            .route()
            .iter()
            .tuple_windows()
            .all(|(a, b)| network.segment(*a).to() == network.segment(*b).from()));
        let first = vehicle.route().first().unwrap();
        let last = vehicle.route().last().unwrap();
        assert_eq!(network.segment(*first).from(), vehicle.origin());
        assert_eq!(network.segment(*last).to(), vehicle.destination());
    }
}

/// A disconnected pair of intersections is unroutable; the spawn is
/// rejected with a typed error rather than crashing anything.
#[test]
fn unroutable_spawn_is_rejected() {
    let data = NetworkData {
        nodes: vec![
            NodeData {
                id: 0,
                position: Point2d::new(0.0, 0.0),
            },
            NodeData {
                id: 1,
                position: Point2d::new(100.0, 0.0),
            },
        ],
        edges: vec![],
    };
    let network = RoadNetwork::from_data(data).unwrap();
    let config = SimConfig {
        spawn_rate: 0.0,
        ..Default::default()
    };
    let mut engine = SimulationEngine::new(network, config).unwrap();
    let origin = node(engine.network(), 0);
    let destination = node(engine.network(), 1);

    let result = engine.spawn_vehicle(origin, destination);
    assert!(matches!(result, Err(SimError::NoRoute { .. })));

    // The engine itself keeps going.
    let metrics = engine.step();
    assert_eq!(metrics.active_vehicles, 0);
}

/// Congestion inflates the effective cost of a segment, so routing around
/// a jammed street wins even when the distances are equal.
#[test]
fn routing_avoids_congested_segments() {
    // A diamond: 0 -> 1 -> 3 and 0 -> 2 -> 3, same lengths both ways.
    let nodes = [
        (0, 0.0, 0.0),
        (1, 100.0, 100.0),
        (2, 100.0, -100.0),
        (3, 200.0, 0.0),
    ];
    let data = NetworkData {
        nodes: nodes
            .iter()
            .map(|(id, x, y)| NodeData {
                id: *id,
                position: Point2d::new(*x, *y),
            })
            .collect(),
        edges: [(0, 1), (1, 3), (0, 2), (2, 3)]
            .iter()
            .map(|(from, to)| EdgeData {
                from: *from,
                to: *to,
                length: Some(100.0),
                free_flow_speed: 1.0,
                capacity: 10,
            })
            .collect(),
    };
    let mut network = RoadNetwork::from_data(data).unwrap();
    let origin = node(&network, 0);
    let destination = node(&network, 3);

    // Jam the upper path.
    let upper = segment_between(&network, 0, 1);
    network.update_congestion(upper, 0.9, 0);

    let route = network.shortest_route(origin, destination, 1.0).unwrap();
    let lower_first = segment_between(&network, 0, 2);
    let lower_second = segment_between(&network, 2, 3);
    assert_eq!(route, vec![lower_first, lower_second]);
}
