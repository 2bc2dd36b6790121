//! Typed configuration for the simulation engine and its controllers.
//!
//! Every tunable lives here with an explicit default, so there are no
//! magic numbers buried in the step loop.

use crate::agent::AgentParams;
use crate::error::SimError;
use serde::{Deserialize, Serialize};

/// The smallest vehicle population a dashboard command may request.
pub const MIN_VEHICLE_COUNT: usize = 10;

/// The largest vehicle population a dashboard command may request.
pub const MAX_VEHICLE_COUNT: usize = 500;

/// Timing constants shared by every signal controller.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SignalTiming {
    /// Number of simulation steps between decision ticks.
    pub decision_interval: u64,
    /// Minimum number of steps a phase must be held before switching.
    pub min_hold: u64,
    /// Length of the all-red interval entered on every phase change.
    pub transition_steps: u32,
}

impl Default for SignalTiming {
    fn default() -> Self {
        Self {
            decision_interval: 5,
            min_hold: 10,
            transition_steps: 3,
        }
    }
}

/// Top-level simulation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimConfig {
    /// Distance travelled per step on a free-flowing unit-speed segment, in m.
    pub speed_factor: f64,
    /// Expected number of vehicles spawned per step.
    pub spawn_rate: f64,
    /// Maximum number of concurrently active vehicles.
    pub population_cap: usize,
    /// Steps after which an unfinished trip is abandoned and counted as a failure.
    pub max_vehicle_steps: u64,
    /// How strongly congestion inflates the routing cost of a segment.
    pub congestion_weight: f64,
    /// Congestion readings older than this many steps are considered stale.
    pub staleness_threshold: u64,
    /// Seed for the engine's RNG, for reproducible runs.
    pub seed: u64,
    pub timing: SignalTiming,
    pub agent: AgentParams,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            speed_factor: 1.0,
            spawn_rate: 0.5,
            population_cap: 100,
            max_vehicle_steps: 1000,
            congestion_weight: 1.0,
            staleness_threshold: 300,
            seed: 1,
            timing: SignalTiming::default(),
            agent: AgentParams::default(),
        }
    }
}

impl SimConfig {
    /// Checks every field for a sensible value.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.speed_factor <= 0.0 {
            return Err(SimError::InvalidConfig("speed_factor must be positive".into()));
        }
        if self.spawn_rate < 0.0 {
            return Err(SimError::InvalidConfig("spawn_rate must not be negative".into()));
        }
        if self.population_cap == 0 {
            return Err(SimError::InvalidConfig("population_cap must be positive".into()));
        }
        if self.timing.decision_interval == 0 {
            return Err(SimError::InvalidConfig("decision_interval must be positive".into()));
        }
        self.agent.validate()
    }
}

/// A control command issued by the dashboard front-end.
///
/// These are the recognised options of the configuration surface: the place
/// to simulate, the target vehicle population, and whether the simulation
/// should be running.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DashboardCommand {
    pub city: String,
    pub vehicle_count: usize,
    pub run: bool,
}

impl DashboardCommand {
    /// Validates the command against the recognised option ranges.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.city.trim().is_empty() {
            return Err(SimError::InvalidConfig("city must not be empty".into()));
        }
        if !(MIN_VEHICLE_COUNT..=MAX_VEHICLE_COUNT).contains(&self.vehicle_count) {
            return Err(SimError::InvalidConfig(format!(
                "vehicle_count {} outside [{}, {}]",
                self.vehicle_count, MIN_VEHICLE_COUNT, MAX_VEHICLE_COUNT
            )));
        }
        Ok(())
    }
}
