use log::info;
use std::fs;
use traffic_rl::{NetworkData, RoadNetwork, SimConfig, SimulationEngine};

const EPISODES: usize = 20;
const STEPS_PER_EPISODE: usize = 2000;
const Q_TABLE_PATH: &str = "qtables.json";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let network = RoadNetwork::from_data(NetworkData::grid(4, 4, 120.0, 8))?;
    let mut engine = SimulationEngine::new(network, SimConfig::default())?;

    // Resume training when a table file from a previous run exists.
    if let Ok(content) = fs::read_to_string(Q_TABLE_PATH) {
        engine.restore_q_snapshot(&serde_json::from_str(&content)?);
        info!("restored q-tables from {}", Q_TABLE_PATH);
    }

    for episode in 0..EPISODES {
        let mut last = engine.metrics();
        for _ in 0..STEPS_PER_EPISODE {
            last = engine.step();
        }
        info!(
            "episode {}: {} trips completed, {} abandoned, avg trip {:.1} steps ({:.1} waiting)",
            episode,
            last.completed_trips,
            last.abandoned_trips,
            last.average_trip_steps,
            last.average_wait_steps
        );
        engine.reset();
    }

    fs::write(
        Q_TABLE_PATH,
        serde_json::to_string_pretty(&engine.q_snapshot())?,
    )?;
    info!("saved q-tables to {}", Q_TABLE_PATH);
    Ok(())
}
