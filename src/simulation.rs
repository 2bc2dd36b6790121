//! The simulation engine: a single-threaded, cooperative discrete
//! time-step loop over the road network.
//!
//! Each `step()` is atomic from the caller's perspective. Within a tick,
//! every signal decision is finalised before any vehicle moves, and all
//! decisions read the congestion/queue snapshot taken at the start of the
//! tick.

use crate::agent::{Policy, QLearningAgent, QTableSnapshot};
use crate::config::{DashboardCommand, SimConfig};
use crate::error::SimError;
use crate::feed::CongestionFeed;
use crate::network::RoadNetwork;
use crate::signal::{Phase, SignalController};
use crate::vehicle::Vehicle;
use crate::{IntersectionId, SegmentId, VehicleId, VehicleSet};
use itertools::Itertools;
use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Attempts at picking a routable origin/destination pair per spawn.
const SPAWN_ATTEMPTS: usize = 4;

/// The active phase of one signalised intersection, keyed by the
/// provider-assigned intersection id for external consumers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalPhaseInfo {
    pub intersection: u64,
    /// Index of the active phase, `None` mid-transition.
    pub phase: Option<usize>,
}

/// The per-step snapshot read by the dashboard.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepMetrics {
    pub step: u64,
    pub active_vehicles: usize,
    pub completed_trips: u64,
    pub abandoned_trips: u64,
    /// Mean steps per completed trip.
    pub average_trip_steps: f64,
    /// Mean steps spent waiting per completed trip.
    pub average_wait_steps: f64,
    pub signal_phases: Vec<SignalPhaseInfo>,
    /// Whether the most recent feed poll failed, leaving congestion stale.
    pub feed_degraded: bool,
    /// Segments whose congestion reading is older than the configured
    /// staleness threshold.
    pub stale_segments: usize,
}

#[derive(Default)]
struct TripStats {
    spawned: u64,
    completed: u64,
    abandoned: u64,
    total_trip_steps: u64,
    total_wait_steps: u64,
}

/// Drives the discrete time-step loop: spawns vehicles, advances them
/// subject to signals and capacity, runs every signal controller, and
/// collects metrics.
pub struct SimulationEngine<P: Policy = QLearningAgent> {
    network: RoadNetwork,
    /// One exclusively-owned controller per signalised intersection.
    controllers: SecondaryMap<IntersectionId, SignalController<P>>,
    vehicles: VehicleSet,
    config: SimConfig,
    step: u64,
    rng: SmallRng,
    stats: TripStats,
    feed_degraded: bool,
    running: bool,
    requested_city: Option<String>,
}

impl SimulationEngine<QLearningAgent> {
    /// Creates an engine with a fresh Q-learning agent per signalised
    /// intersection. Fails with [SimError::InvalidNetwork] on an empty
    /// network and [SimError::InvalidConfig] on nonsense configuration.
    pub fn new(network: RoadNetwork, config: SimConfig) -> Result<Self, SimError> {
        let params = config.agent.clone();
        Self::with_policies(network, config, |actions| {
            QLearningAgent::new(params.clone(), actions)
        })
    }

    /// Learned Q-tables of every signalised intersection, keyed by the
    /// provider-assigned intersection id.
    pub fn q_snapshot(&self) -> BTreeMap<u64, QTableSnapshot> {
        self.controllers
            .iter()
            .map(|(id, controller)| {
                (
                    self.network.intersection(id).ext_id(),
                    controller.policy().snapshot(),
                )
            })
            .collect()
    }

    /// Restores previously saved Q-tables. Intersections absent from the
    /// snapshot (or from the network) keep their current tables.
    pub fn restore_q_snapshot(&mut self, snapshot: &BTreeMap<u64, QTableSnapshot>) {
        for (ext_id, table) in snapshot {
            if let Some(id) = self.network.intersection_by_ext(*ext_id) {
                if let Some(controller) = self.controllers.get_mut(id) {
                    controller.policy_mut().restore(table);
                }
            }
        }
    }

    /// Discards everything the signals have learned.
    pub fn reset_learning(&mut self) {
        for (_, controller) in self.controllers.iter_mut() {
            let actions = controller.phases().len();
            *controller.policy_mut() = QLearningAgent::new(self.config.agent.clone(), actions);
        }
    }
}

impl<P: Policy> SimulationEngine<P> {
    /// Creates an engine with a caller-supplied policy per signalised
    /// intersection; `make_policy` receives the number of phases.
    ///
    /// Intersections with fewer than two approaches have nothing to
    /// control and get no signal.
    pub fn with_policies(
        network: RoadNetwork,
        config: SimConfig,
        mut make_policy: impl FnMut(usize) -> P,
    ) -> Result<Self, SimError> {
        config.validate()?;
        if network.intersection_count() == 0 {
            return Err(SimError::InvalidNetwork("refusing to start on an empty network".into()));
        }

        let mut controllers = SecondaryMap::new();
        for (id, intersection) in network.intersections() {
            let approaches = intersection.approaches();
            if approaches.len() < 2 {
                continue;
            }
            // One phase per approach: each phase gives exactly one
            // approach right-of-way.
            let phases = approaches
                .iter()
                .map(|segment| Phase {
                    open: SmallVec::from_slice(&[*segment]),
                })
                .collect::<Vec<_>>();
            let controller = SignalController::new(
                SmallVec::from_slice(approaches),
                phases,
                config.timing,
                config.agent.buckets,
                make_policy(approaches.len()),
            );
            controllers.insert(id, controller);
        }

        info!(
            "simulation ready: {} intersections ({} signalised), {} segments",
            network.intersection_count(),
            controllers.len(),
            network.segment_count()
        );
        let rng = SmallRng::seed_from_u64(config.seed);
        Ok(Self {
            network,
            controllers,
            vehicles: VehicleSet::with_key(),
            config,
            step: 0,
            rng,
            stats: TripStats::default(),
            feed_degraded: false,
            running: true,
            requested_city: None,
        })
    }

    /// Advances the simulation by one tick and returns the step snapshot.
    pub fn step(&mut self) -> StepMetrics {
        self.step += 1;

        // Queue snapshot: vehicles left waiting by the previous tick,
        // grouped by the intersection they are queued at.
        let mut waiting: SecondaryMap<IntersectionId, u64> = SecondaryMap::new();
        for vehicle in self.vehicles.values() {
            if vehicle.is_waiting() {
                let head = self.network.segment(vehicle.current_segment()).to();
                if let Some(entry) = waiting.entry(head) {
                    *entry.or_insert(0) += 1;
                }
            }
        }

        // Decide-then-act: every phase decision is finalised before any
        // vehicle moves.
        let decision_tick = self.step % self.config.timing.decision_interval == 0;
        let network = &self.network;
        let rng = &mut self.rng;
        for (id, controller) in self.controllers.iter_mut() {
            controller.tick();
            if let Some(count) = waiting.get(id) {
                controller.note_waiting(*count);
            }
            if decision_tick {
                controller.decide(|segment| network.segment(segment).congestion(), &mut *rng);
            }
        }

        self.advance_vehicles();
        self.spawn_vehicles(self.config.spawn_rate);
        self.metrics()
    }

    /// Moves every active vehicle along its route, honouring signals and
    /// segment capacity, and retires finished or timed-out trips.
    fn advance_vehicles(&mut self) {
        let ids: Vec<VehicleId> = self.vehicles.keys().collect();
        for id in ids {
            let age = self.step.saturating_sub(self.vehicles[id].spawned_at());
            if age > self.config.max_vehicle_steps {
                let segment = self.vehicles[id].current_segment();
                self.network.leave(segment);
                if let Some(vehicle) = self.vehicles.remove(id) {
                    self.stats.abandoned += 1;
                    warn!(
                        "vehicle {:?} abandoned after {} steps ({} route legs left)",
                        id,
                        age,
                        vehicle.route().len()
                    );
                }
                continue;
            }

            let fraction = {
                let segment = self.network.segment(self.vehicles[id].current_segment());
                self.config.speed_factor * segment.free_flow_speed() * (1.0 - segment.congestion())
                    / segment.length()
            };
            if !self.vehicles[id].advance(fraction) {
                self.vehicles[id].clear_waiting();
                continue;
            }

            // At the end of the segment: complete, cross, or queue.
            let current = self.vehicles[id].current_segment();
            if self.vehicles[id].on_final_leg() {
                self.network.leave(current);
                self.vehicles[id].complete(self.step);
                if let Some(vehicle) = self.vehicles.remove(id) {
                    self.stats.completed += 1;
                    self.stats.total_trip_steps += self.step - vehicle.spawned_at();
                    self.stats.total_wait_steps += vehicle.wait_steps();
                }
                continue;
            }

            let head = self.network.segment(current).to();
            let next = match self.vehicles[id].next_segment() {
                Some(next) => next,
                None => continue,
            };
            let permitted = self
                .controllers
                .get(head)
                .map_or(true, |controller| controller.permits(current));
            if permitted && self.network.try_enter(next) {
                self.network.leave(current);
                self.vehicles[id].enter_next_leg();
            } else {
                // Held at the stop line; this feeds the reward signal of
                // the intersection the vehicle is queued at.
                self.vehicles[id].hold();
            }
        }
    }

    /// Stochastically spawns new vehicles: a Poisson-distributed count
    /// with the given expected rate, silently capped by the configured
    /// population cap. Returns the number actually created.
    pub fn spawn_vehicles(&mut self, rate: f64) -> usize {
        if rate <= 0.0 {
            return 0;
        }
        let available = self
            .config
            .population_cap
            .saturating_sub(self.vehicles.len());
        if available == 0 {
            return 0;
        }
        let count = match Poisson::new(rate) {
            Ok(dist) => dist.sample(&mut self.rng) as usize,
            Err(_) => 0,
        };
        let mut spawned = 0;
        for _ in 0..count.min(available) {
            if self.spawn_random().is_some() {
                spawned += 1;
            }
        }
        spawned
    }

    /// Picks a random origin/destination pair and tries to spawn a vehicle
    /// between them, retrying a few times on unroutable pairs.
    fn spawn_random(&mut self) -> Option<VehicleId> {
        let ids: Vec<IntersectionId> = self.network.intersections().map(|(id, _)| id).collect();
        if ids.len() < 2 {
            return None;
        }
        for _ in 0..SPAWN_ATTEMPTS {
            let origin = ids[self.rng.gen_range(0..ids.len())];
            let destination = ids[self.rng.gen_range(0..ids.len())];
            if origin == destination {
                continue;
            }
            match self.spawn_vehicle(origin, destination) {
                Ok(Some(id)) => return Some(id),
                Ok(None) => continue,
                Err(SimError::NoRoute { .. }) => {
                    debug!("spawn discarded: no route {:?} -> {:?}", origin, destination);
                    continue;
                }
                Err(_) => return None,
            }
        }
        None
    }

    /// Spawns a vehicle between two intersections, routing it along the
    /// currently cheapest path.
    ///
    /// Returns `Ok(None)` when the population cap or the capacity of the
    /// first route segment prevents the spawn; both are clean non-events.
    pub fn spawn_vehicle(
        &mut self,
        origin: IntersectionId,
        destination: IntersectionId,
    ) -> Result<Option<VehicleId>, SimError> {
        if self.vehicles.len() >= self.config.population_cap {
            return Ok(None);
        }
        if origin == destination {
            return Err(SimError::NoRoute { origin, destination });
        }
        let route =
            self.network
                .shortest_route(origin, destination, self.config.congestion_weight)?;
        debug_assert!(
            route
                .iter()
                .tuple_windows()
                .all(|(a, b)| self.network.segment(*a).to() == self.network.segment(*b).from()),
            "route is not contiguous"
        );
        if !self.network.try_enter(route[0]) {
            debug!("spawn discarded: first segment at capacity");
            return Ok(None);
        }
        let step = self.step;
        let id = self
            .vehicles
            .insert_with_key(|id| Vehicle::new(id, origin, destination, route, step));
        self.stats.spawned += 1;
        Ok(Some(id))
    }

    /// Applies one poll of the live traffic feed. A failed poll degrades
    /// the simulation (congestion goes stale) but never stops it.
    pub fn apply_feed(&mut self, feed: &mut impl CongestionFeed) {
        match feed.poll() {
            Ok(updates) => {
                self.feed_degraded = false;
                for update in updates {
                    self.network
                        .update_congestion(update.segment, update.level, self.step);
                }
            }
            Err(err) => {
                warn!("traffic feed degraded, keeping last known congestion: {}", err);
                self.feed_degraded = true;
            }
        }
    }

    /// Clears all vehicles, the step counter and the trip statistics while
    /// preserving everything the signals have learned. Use
    /// [SimulationEngine::reset_learning] to also drop the Q-tables.
    pub fn reset(&mut self) {
        self.vehicles.clear();
        self.network.clear_occupancy();
        self.step = 0;
        self.stats = TripStats::default();
        self.feed_degraded = false;
        for (_, controller) in self.controllers.iter_mut() {
            controller.reset_state();
        }
    }

    /// Applies a dashboard control command to the configuration surface.
    pub fn apply_command(&mut self, command: &DashboardCommand) -> Result<(), SimError> {
        command.validate()?;
        self.config.population_cap = command.vehicle_count;
        self.running = command.run;
        self.requested_city = Some(command.city.clone());
        info!(
            "dashboard command applied: city={}, vehicle_count={}, run={}",
            command.city, command.vehicle_count, command.run
        );
        Ok(())
    }

    /// The place most recently requested through the dashboard, consumed
    /// by the glue that rebuilds the network from provider data.
    pub fn take_requested_city(&mut self) -> Option<String> {
        self.requested_city.take()
    }

    /// Whether the dashboard currently wants the simulation stepped.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// The current metrics snapshot, also returned by every `step()`.
    pub fn metrics(&self) -> StepMetrics {
        let signal_phases = self
            .controllers
            .iter()
            .map(|(id, controller)| SignalPhaseInfo {
                intersection: self.network.intersection(id).ext_id(),
                phase: controller.active_phase(),
            })
            .collect();
        let average = |total: u64| {
            if self.stats.completed > 0 {
                total as f64 / self.stats.completed as f64
            } else {
                0.0
            }
        };
        let stale_segments = self
            .network
            .segments()
            .filter(|(id, _)| {
                self.network
                    .congestion_is_stale(*id, self.step, self.config.staleness_threshold)
            })
            .count();
        StepMetrics {
            step: self.step,
            active_vehicles: self.vehicles.len(),
            completed_trips: self.stats.completed,
            abandoned_trips: self.stats.abandoned,
            average_trip_steps: average(self.stats.total_trip_steps),
            average_wait_steps: average(self.stats.total_wait_steps),
            signal_phases,
            feed_degraded: self.feed_degraded,
            stale_segments,
        }
    }

    /// Gets the current simulation step.
    pub fn current_step(&self) -> u64 {
        self.step
    }

    /// The road network being simulated.
    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    /// Mutable network access for the external data collaborators.
    pub fn network_mut(&mut self) -> &mut RoadNetwork {
        &mut self.network
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Returns an iterator over all the active vehicles.
    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Gets a reference to the vehicle with the given ID, if it is still
    /// active.
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    /// Current vehicle positions for rendering: segment and fraction
    /// travelled along it.
    pub fn vehicle_positions(&self) -> impl Iterator<Item = (VehicleId, SegmentId, f64)> + '_ {
        self.vehicles
            .iter()
            .map(|(id, vehicle)| (id, vehicle.current_segment(), vehicle.progress()))
    }

    /// The controller of the given intersection, if it is signalised.
    pub fn controller(&self, id: IntersectionId) -> Option<&SignalController<P>> {
        self.controllers.get(id)
    }

    /// Returns an iterator over all the signal controllers.
    pub fn controllers(&self) -> impl Iterator<Item = (IntersectionId, &SignalController<P>)> {
        self.controllers.iter()
    }

    /// Total vehicles created since the last reset.
    pub fn spawned_total(&self) -> u64 {
        self.stats.spawned
    }
}
