//! Phase-selection policies for signal controllers: a tabular Q-learning
//! agent and a fixed-duration baseline, both behind the same
//! choose/update contract.

use crate::error::SimError;
use arrayvec::ArrayVec;
use log::debug;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Maximum number of approaches encoded into a state key. Intersections
/// beyond this are extremely rare in drivable networks; extra approaches
/// are ignored by the discretization.
pub const MAX_APPROACHES: usize = 8;

/// A discretized observation of one intersection: a small congestion
/// bucket per approach, plus the currently active phase. The finite
/// cardinality of this key is what bounds Q-table growth.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateKey {
    queues: ArrayVec<u8, MAX_APPROACHES>,
    phase: u8,
}

impl StateKey {
    /// Buckets per-approach congestion levels against the given boundaries
    /// and pairs them with the active phase.
    pub fn discretize(
        levels: impl IntoIterator<Item = f64>,
        phase: usize,
        buckets: &[f64; 3],
    ) -> Self {
        let mut queues = ArrayVec::new();
        for level in levels.into_iter().take(MAX_APPROACHES) {
            let bucket = buckets.iter().filter(|b| level >= **b).count() as u8;
            queues.push(bucket);
        }
        Self {
            queues,
            phase: phase as u8,
        }
    }

    /// Compact string form used as a JSON map key, e.g. `"2-0-1|1"`.
    pub fn encode(&self) -> String {
        let levels = self
            .queues
            .iter()
            .map(|q| q.to_string())
            .collect::<Vec<_>>()
            .join("-");
        format!("{}|{}", levels, self.phase)
    }

    /// Parses the [StateKey::encode] form back; `None` on malformed input.
    pub fn decode(encoded: &str) -> Option<Self> {
        let (levels, phase) = encoded.split_once('|')?;
        let mut queues = ArrayVec::new();
        if !levels.is_empty() {
            for part in levels.split('-') {
                queues.try_push(part.parse().ok()?).ok()?;
            }
        }
        Some(Self {
            queues,
            phase: phase.parse().ok()?,
        })
    }
}

/// The contract between a signal controller and its decision policy.
///
/// Keeping this a trait leaves controllers polymorphic over tabular,
/// function-approximated, and non-learning implementations.
pub trait Policy {
    /// Picks the index of the phase to activate next.
    fn choose_action(&mut self, state: &StateKey, rng: &mut dyn RngCore) -> usize;

    /// Feeds back the observed outcome of a previous decision.
    fn update(&mut self, state: &StateKey, action: usize, reward: f64, next_state: &StateKey);
}

/// Tunables of the Q-learning agent, exposed at the construction boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentParams {
    /// Learning rate (alpha).
    pub learning_rate: f64,
    /// Discount factor (gamma).
    pub discount: f64,
    /// Initial exploration rate (epsilon).
    pub epsilon_start: f64,
    /// Lower bound that epsilon decays towards.
    pub epsilon_floor: f64,
    /// Multiplicative epsilon decay applied per decision.
    pub epsilon_decay: f64,
    /// Congestion bucket boundaries for the state discretization.
    pub buckets: [f64; 3],
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount: 0.9,
            epsilon_start: 0.2,
            epsilon_floor: 0.02,
            epsilon_decay: 0.995,
            buckets: [0.3, 0.6, 0.9],
        }
    }
}

impl AgentParams {
    pub(crate) fn validate(&self) -> Result<(), SimError> {
        if !(0.0..=1.0).contains(&self.learning_rate) || self.learning_rate == 0.0 {
            return Err(SimError::InvalidConfig("learning_rate must be in (0, 1]".into()));
        }
        if !(0.0..1.0).contains(&self.discount) {
            return Err(SimError::InvalidConfig("discount must be in [0, 1)".into()));
        }
        if !(0.0..=1.0).contains(&self.epsilon_start) || !(0.0..=1.0).contains(&self.epsilon_floor) {
            return Err(SimError::InvalidConfig("epsilon must be in [0, 1]".into()));
        }
        if self.epsilon_floor > self.epsilon_start {
            return Err(SimError::InvalidConfig(
                "epsilon_floor must not exceed epsilon_start".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.epsilon_decay) || self.epsilon_decay == 0.0 {
            return Err(SimError::InvalidConfig("epsilon_decay must be in (0, 1]".into()));
        }
        Ok(())
    }
}

/// Serialized form of a Q-table: encoded state key to action values.
pub type QTableSnapshot = BTreeMap<String, Vec<f64>>;

/// A tabular Q-learning agent with epsilon-greedy action selection.
///
/// Table entries are created lazily on first visit and never deleted;
/// growth is bounded by the discretization cardinality.
pub struct QLearningAgent {
    params: AgentParams,
    epsilon: f64,
    actions: usize,
    table: HashMap<StateKey, Vec<f64>>,
}

impl QLearningAgent {
    pub fn new(params: AgentParams, actions: usize) -> Self {
        let epsilon = params.epsilon_start;
        Self {
            params,
            epsilon,
            actions,
            table: HashMap::new(),
        }
    }

    /// Current exploration rate.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Number of states visited so far.
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// The learned action values for a state, if it has been visited.
    pub fn values(&self, state: &StateKey) -> Option<&[f64]> {
        self.table.get(state).map(Vec::as_slice)
    }

    /// Serializes the Q-table for persistence.
    pub fn snapshot(&self) -> QTableSnapshot {
        self.table
            .iter()
            .map(|(state, values)| (state.encode(), values.clone()))
            .collect()
    }

    /// Restores a previously saved Q-table. Malformed keys and rows of the
    /// wrong width are skipped, so an agent restored from another
    /// intersection's table starts fresh for those states.
    pub fn restore(&mut self, snapshot: &QTableSnapshot) {
        for (encoded, values) in snapshot {
            match StateKey::decode(encoded) {
                Some(state) if values.len() == self.actions => {
                    self.table.insert(state, values.clone());
                }
                _ => debug!("skipping malformed q-table entry {:?}", encoded),
            }
        }
    }

    fn values_mut(&mut self, state: &StateKey) -> &mut Vec<f64> {
        self.table
            .entry(state.clone())
            .or_insert_with(|| vec![0.0; self.actions])
    }
}

impl Policy for QLearningAgent {
    fn choose_action(&mut self, state: &StateKey, rng: &mut dyn RngCore) -> usize {
        let action = if rng.gen::<f64>() < self.epsilon {
            rng.gen_range(0..self.actions)
        } else {
            greedy(self.values_mut(state))
        };
        self.epsilon = (self.epsilon * self.params.epsilon_decay).max(self.params.epsilon_floor);
        action
    }

    fn update(&mut self, state: &StateKey, action: usize, reward: f64, next_state: &StateKey) {
        let next_max = self
            .table
            .get(next_state)
            .map(|values| values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            .unwrap_or(0.0);
        let alpha = self.params.learning_rate;
        let gamma = self.params.discount;
        let values = self.values_mut(state);
        let old = values[action];
        values[action] = old + alpha * (reward + gamma * next_max - old);
    }
}

/// Picks the highest-valued action, ties broken by lowest index.
fn greedy(values: &[f64]) -> usize {
    let mut best = 0;
    for (action, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = action;
        }
    }
    best
}

/// A non-learning baseline that cycles phases in declaration order,
/// giving every phase a fixed duration of one decision interval.
pub struct FixedCycle {
    actions: usize,
    next: usize,
}

impl FixedCycle {
    pub fn new(actions: usize) -> Self {
        Self { actions, next: 0 }
    }
}

impl Policy for FixedCycle {
    fn choose_action(&mut self, _state: &StateKey, _rng: &mut dyn RngCore) -> usize {
        let action = self.next;
        self.next = (self.next + 1) % self.actions.max(1);
        action
    }

    fn update(&mut self, _state: &StateKey, _action: usize, _reward: f64, _next_state: &StateKey) {}
}
