use crate::{action::Action, rng::SimRng};

use super::{forage_or_wander, Observation, Policy};

const MOVES: [(i32, i32); 5] = [(0, 0), (1, 0), (-1, 0), (0, 1), (0, -1)];

/// Reactive baseline: gather if anything is underfoot, otherwise wander
/// (staying put is one of the options).
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPolicy;

impl RandomPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &str {
        "random"
    }

    fn decide(&self, obs: &Observation<'_>, rng: &mut SimRng) -> Action {
        forage_or_wander(obs, &MOVES, rng)
    }
}
