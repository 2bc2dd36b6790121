//! Compares the learned signal controller against a fixed-duration
//! baseline on the same deterministic demand pattern.

use traffic_rl::{
    AgentParams, EdgeData, FixedCycle, NetworkData, NodeData, Point2d, Policy, RoadNetwork,
    SimConfig, SignalTiming, SimulationEngine, StepMetrics,
};

/// One signalised intersection fed from the north and the west, draining
/// east. All demand arrives on the northern approach.
fn junction_network() -> NetworkData {
    let nodes = [
        (0, 0.0, 100.0),   // north
        (1, -100.0, 0.0),  // west
        (2, 0.0, 0.0),     // junction
        (3, 100.0, 0.0),   // east
    ];
    NetworkData {
        nodes: nodes
            .iter()
            .map(|(id, x, y)| NodeData {
                id: *id,
                position: Point2d::new(*x, *y),
            })
            .collect(),
        edges: [(0, 2), (1, 2), (2, 3)]
            .iter()
            .map(|(from, to)| EdgeData {
                from: *from,
                to: *to,
                length: Some(30.0),
                free_flow_speed: 1.0,
                capacity: 100,
            })
            .collect(),
    }
}

fn test_config() -> SimConfig {
    SimConfig {
        spawn_rate: 0.0,
        population_cap: 200,
        timing: SignalTiming {
            decision_interval: 2,
            min_hold: 4,
            transition_steps: 2,
        },
        agent: AgentParams {
            epsilon_start: 0.2,
            epsilon_floor: 0.02,
            epsilon_decay: 0.995,
            ..Default::default()
        },
        seed: 7,
        ..Default::default()
    }
}

/// Spawns a northern vehicle every other step for most of the run, then
/// drains, and returns the final metrics.
fn drive<P: Policy>(engine: &mut SimulationEngine<P>, steps: u64) -> StepMetrics {
    let origin = engine.network().intersection_by_ext(0).unwrap();
    let destination = engine.network().intersection_by_ext(3).unwrap();
    let mut last = engine.metrics();
    for step in 0..steps {
        if step < steps - 400 && step % 2 == 0 {
            let _ = engine.spawn_vehicle(origin, destination);
        }
        last = engine.step();
    }
    last
}

/// With every vehicle arriving on one approach, the Q-learning controller
/// learns to keep that approach green, while the fixed cycle keeps paying
/// for pointless switches. After training, the adaptive signal must beat
/// the baseline on average trip duration over the same spawn pattern.
#[test]
fn adaptive_signal_beats_fixed_cycle() {
    let config = test_config();

    let network = RoadNetwork::from_data(junction_network()).unwrap();
    let mut adaptive = SimulationEngine::new(network, config.clone()).unwrap();
    // Training episodes: learning persists across the reset.
    drive(&mut adaptive, 2000);
    adaptive.reset();
    let adaptive_metrics = drive(&mut adaptive, 3000);

    let network = RoadNetwork::from_data(junction_network()).unwrap();
    let mut baseline =
        SimulationEngine::with_policies(network, config, |actions| FixedCycle::new(actions))
            .unwrap();
    baseline.reset();
    let baseline_metrics = drive(&mut baseline, 3000);

    assert!(adaptive_metrics.completed_trips > 0);
    assert!(baseline_metrics.completed_trips > 0);
    assert_eq!(adaptive_metrics.abandoned_trips, 0);
    assert!(
        adaptive_metrics.average_trip_steps < baseline_metrics.average_trip_steps,
        "adaptive {:.2} steps/trip vs baseline {:.2}",
        adaptive_metrics.average_trip_steps,
        baseline_metrics.average_trip_steps
    );
    assert!(
        adaptive_metrics.average_wait_steps < baseline_metrics.average_wait_steps,
        "adaptive waited {:.2} vs baseline {:.2}",
        adaptive_metrics.average_wait_steps,
        baseline_metrics.average_wait_steps
    );
}
