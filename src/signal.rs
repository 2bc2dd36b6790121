//! Per-intersection traffic signal control: a small phase state machine
//! that delegates phase selection to a learning policy.

use crate::agent::{Policy, QLearningAgent, StateKey};
use crate::config::SignalTiming;
use crate::SegmentId;
use rand::RngCore;
use smallvec::SmallVec;

/// One right-of-way configuration: the set of approaches allowed to move
/// while the phase is active. Phases form a closed set declared at
/// construction.
#[derive(Clone, Debug)]
pub struct Phase {
    pub open: SmallVec<[SegmentId; 4]>,
}

/// The controller's state machine. `Transitioning` is the mandatory
/// all-red interval entered on every phase change, so two conflicting
/// green phases are never adjacent in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalState {
    Active {
        phase: usize,
        /// Steps the phase has been held.
        since: u64,
    },
    Transitioning {
        to: usize,
        remaining: u32,
    },
}

/// Controls the signal of a single intersection.
///
/// The controller owns its phases, timing and decision policy; nothing is
/// shared between intersections, so signals learn independently.
pub struct SignalController<P: Policy = QLearningAgent> {
    /// The approaches observed for the discretized state, in fixed order.
    approaches: SmallVec<[SegmentId; 4]>,
    phases: Vec<Phase>,
    timing: SignalTiming,
    buckets: [f64; 3],
    state: SignalState,
    policy: P,
    /// State and action of the most recent decision, fed back on the next.
    last_decision: Option<(StateKey, usize)>,
    /// Waiting vehicles accumulated since the last decision tick.
    pending_wait: u64,
}

impl<P: Policy> SignalController<P> {
    /// Creates a controller starting in the first declared phase.
    ///
    /// # Panics
    /// Panics if `phases` is empty; an intersection without a phase has no
    /// meaningful signal.
    pub fn new(
        approaches: SmallVec<[SegmentId; 4]>,
        phases: Vec<Phase>,
        timing: SignalTiming,
        buckets: [f64; 3],
        policy: P,
    ) -> Self {
        assert!(!phases.is_empty(), "a signal controller needs at least one phase");
        Self {
            approaches,
            phases,
            timing,
            buckets,
            state: SignalState::Active { phase: 0, since: 0 },
            policy,
            last_decision: None,
            pending_wait: 0,
        }
    }

    /// The current state of the phase machine.
    pub fn state(&self) -> SignalState {
        self.state
    }

    /// The index of the active phase, or `None` mid-transition.
    pub fn active_phase(&self) -> Option<usize> {
        match self.state {
            SignalState::Active { phase, .. } => Some(phase),
            SignalState::Transitioning { .. } => None,
        }
    }

    /// The declared phases.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// The decision policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Whether vehicles on the given approach currently have right-of-way.
    /// Nothing moves during a transition.
    pub fn permits(&self, segment: SegmentId) -> bool {
        match self.state {
            SignalState::Active { phase, .. } => self.phases[phase].open.contains(&segment),
            SignalState::Transitioning { .. } => false,
        }
    }

    /// Advances the state machine by one step. Called once per simulation
    /// step, before any vehicle moves.
    pub fn tick(&mut self) {
        match self.state {
            SignalState::Active { ref mut since, .. } => *since += 1,
            SignalState::Transitioning { to, ref mut remaining } => {
                *remaining -= 1;
                if *remaining == 0 {
                    self.state = SignalState::Active { phase: to, since: 0 };
                }
            }
        }
    }

    /// Records vehicles observed waiting at this intersection during one
    /// step; drained into the reward at the next decision tick.
    pub fn note_waiting(&mut self, count: u64) {
        self.pending_wait += count;
    }

    /// Runs one decision tick: closes the learning loop for the previous
    /// decision and asks the policy for the next phase. A differing choice
    /// is only adopted once the minimum hold has elapsed, and always via
    /// the all-red transition.
    ///
    /// Intersections with a single phase have nothing to decide and skip
    /// the policy entirely.
    pub fn decide(&mut self, congestion: impl Fn(SegmentId) -> f64, rng: &mut dyn RngCore) {
        if self.phases.len() < 2 {
            return;
        }
        let (phase, since) = match self.state {
            SignalState::Active { phase, since } => (phase, since),
            // No decisions mid-transition.
            SignalState::Transitioning { .. } => return,
        };

        let state = StateKey::discretize(
            self.approaches.iter().map(|id| congestion(*id)),
            phase,
            &self.buckets,
        );

        // Reward: configurations that drained queues fastest score highest.
        let reward = -(self.pending_wait as f64);
        self.pending_wait = 0;
        if let Some((prev_state, prev_action)) = self.last_decision.take() {
            self.policy.update(&prev_state, prev_action, reward, &state);
        }

        let action = self.policy.choose_action(&state, rng);
        self.last_decision = Some((state, action));

        if action != phase && since >= self.timing.min_hold {
            self.state = if self.timing.transition_steps == 0 {
                SignalState::Active { phase: action, since: 0 }
            } else {
                SignalState::Transitioning {
                    to: action,
                    remaining: self.timing.transition_steps,
                }
            };
        }
    }

    /// Returns the signal to its default phase and forgets any half-open
    /// learning loop. The policy itself (and its Q-table) is untouched.
    pub fn reset_state(&mut self) {
        self.state = SignalState::Active { phase: 0, since: 0 };
        self.last_decision = None;
        self.pending_wait = 0;
    }
}
