use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    action::Action,
    rng::SimRng,
    world::{BuildingKind, Resource, Stock},
};

use super::{forage_or_wander, Observation, Policy};

pub const EPSILON_MAX: f64 = 0.25;

pub const DEFAULT_WEIGHTS: [(&str, f64); 13] = [
    ("w_food", 3.0),
    ("w_wood", 1.0),
    ("w_stone", 1.0),
    ("w_inv_food", 0.8),
    ("w_inv_wood", 0.3),
    ("w_inv_stone", 0.3),
    ("inv_soft_cap", 6.0),
    ("w_build_storage", 4.0),
    ("w_build_hut", 2.0),
    ("w_move", 0.1),
    ("w_explore", 0.2),
    ("epsilon", 0.05),
    ("food_pressure", 2.0),
];

const ABUNDANCE_SCALE: f64 = 3.0;
const UNAFFORDABLE: f64 = 0.02;
const FIRST_STORAGE_BONUS: f64 = 5.0;
const HUT_WITHOUT_STORAGE: f64 = -3.0;
const OCCUPIED_TILE_EXPLORE: f64 = 0.3;

/// Named utility weights. Lookups fall back to [`DEFAULT_WEIGHTS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weights(BTreeMap<String, f64>);

impl Weights {
    pub fn defaults() -> Self {
        Self(
            DEFAULT_WEIGHTS
                .iter()
                .map(|&(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    pub fn from_map(map: BTreeMap<String, f64>) -> Self {
        Self(map)
    }

    /// Missing names are filled in from the defaults; present ones win.
    pub fn with_defaults(mut self) -> Self {
        for (name, value) in DEFAULT_WEIGHTS {
            self.0.entry(name.to_string()).or_insert(value);
        }
        self
    }

    pub fn get(&self, name: &str) -> f64 {
        self.0
            .get(name)
            .copied()
            .or_else(|| {
                DEFAULT_WEIGHTS
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|&(_, v)| v)
            })
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn epsilon(&self) -> f64 {
        let eps = self.get("epsilon");
        if eps.is_nan() {
            return 0.0;
        }
        eps.clamp(0.0, EPSILON_MAX)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.0.values_mut()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }
}

/// Saturating curve in `[0, 1]`.
fn diminishing(x: f64, cap: f64) -> f64 {
    1.0 - (-x.max(0.0) / cap.max(1e-9)).exp()
}

/// Epsilon-greedy scorer over the legal actions on the current tile.
#[derive(Debug, Clone)]
pub struct UtilityPolicy {
    weights: Weights,
    bootstrap_storage: bool,
}

impl UtilityPolicy {
    pub fn new(weights: Weights) -> Self {
        Self {
            weights,
            bootstrap_storage: false,
        }
    }

    /// Request a storage as soon as any building material is held on a free tile.
    pub fn with_storage_bootstrap(mut self, enabled: bool) -> Self {
        self.bootstrap_storage = enabled;
        self
    }

    /// Gathers by resource, then builds by kind, then moves by direction.
    pub fn candidates(obs: &Observation<'_>) -> Vec<Action> {
        let mut out = Vec::with_capacity(9);
        for resource in Resource::ALL {
            if obs.tile.get(resource) > 0 {
                out.push(Action::Gather { resource });
            }
        }
        if obs.structure.is_none() {
            for building in BuildingKind::ALL {
                out.push(Action::Build { building });
            }
        }
        for (dx, dy) in Action::CARDINAL_MOVES {
            out.push(Action::step(dx, dy));
        }
        out
    }

    pub fn score(&self, obs: &Observation<'_>, action: &Action) -> f64 {
        let w = &self.weights;
        let inv = &obs.inventory;
        let cap = w.get("inv_soft_cap");
        let inv_term = w.get("w_inv_food") * diminishing(inv.food as f64, cap)
            + w.get("w_inv_wood") * diminishing(inv.wood as f64, cap)
            + w.get("w_inv_stone") * diminishing(inv.stone as f64, cap);

        let population = obs.view.total_population() as f64;
        let food = obs.view.total_food();
        let pressure = if population > 0.0 && food < population {
            (population - food) / population.max(1.0)
        } else {
            0.0
        };

        match *action {
            Action::Gather { resource } => {
                let base = match resource {
                    Resource::Food => w.get("w_food"),
                    Resource::Wood => w.get("w_wood"),
                    Resource::Stone => w.get("w_stone"),
                };
                let abundance = diminishing(obs.tile.get(resource) as f64, ABUNDANCE_SCALE);
                let food_bonus = if resource == Resource::Food {
                    pressure * w.get("food_pressure")
                } else {
                    0.0
                };
                base * (0.5 + 0.5 * abundance) + inv_term + food_bonus
            }
            Action::Build { building } => {
                let affordable = obs
                    .view
                    .cost(building)
                    .map(|cost| inv.covers(cost))
                    .unwrap_or(false);
                let pay = if affordable { 1.0 } else { UNAFFORDABLE };
                let has_storage = obs.view.has_kind(BuildingKind::Storage);
                match building {
                    BuildingKind::Storage => {
                        let bonus = if has_storage { 0.0 } else { FIRST_STORAGE_BONUS };
                        (w.get("w_build_storage") + bonus) * pay + inv_term
                    }
                    BuildingKind::Hut => {
                        let penalty = if has_storage { 0.0 } else { HUT_WITHOUT_STORAGE };
                        (w.get("w_build_hut") + penalty) * pay + inv_term
                    }
                }
            }
            Action::Move { .. } => {
                let emptiness = if has_gatherable(&obs.tile) {
                    OCCUPIED_TILE_EXPLORE
                } else {
                    1.0
                };
                w.get("w_move") + w.get("w_explore") * emptiness + inv_term
            }
        }
    }
}

fn has_gatherable(tile: &Stock) -> bool {
    !tile.is_empty()
}

impl Policy for UtilityPolicy {
    fn name(&self) -> &str {
        "utility"
    }

    fn decide(&self, obs: &Observation<'_>, rng: &mut SimRng) -> Action {
        if self.bootstrap_storage
            && obs.structure.is_none()
            && (obs.inventory.wood > 0 || obs.inventory.stone > 0)
        {
            return Action::Build {
                building: BuildingKind::Storage,
            };
        }

        if rng.random() < self.weights.epsilon() {
            return forage_or_wander(obs, &Action::CARDINAL_MOVES, rng);
        }

        let mut best: Option<(f64, Action)> = None;
        for action in Self::candidates(obs) {
            let utility = self.score(obs, &action);
            // NaN never wins.
            let better = match best {
                None => !utility.is_nan(),
                Some((top, _)) => utility > top,
            };
            if better {
                best = Some((utility, action));
            }
        }
        best.map(|(_, action)| action)
            .unwrap_or_else(|| Action::step(1, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::Scene;
    use crate::world::{AgentId, Position, Structure};

    fn greedy() -> UtilityPolicy {
        let mut weights = Weights::defaults();
        weights.set("epsilon", 0.0);
        UtilityPolicy::new(weights)
    }

    #[test]
    fn epsilon_is_clamped() {
        let mut weights = Weights::defaults();
        weights.set("epsilon", 0.9);
        assert_eq!(weights.epsilon(), EPSILON_MAX);
        weights.set("epsilon", -1.0);
        assert_eq!(weights.epsilon(), 0.0);
        assert_eq!(Weights::default().epsilon(), 0.05);
    }

    #[test]
    fn candidates_follow_enumeration_order() {
        let scene = Scene::new(Stock::new(1, 0, 2), Stock::default());
        let candidates = UtilityPolicy::candidates(&scene.observe());
        assert_eq!(
            candidates,
            vec![
                Action::Gather {
                    resource: Resource::Food
                },
                Action::Gather {
                    resource: Resource::Stone
                },
                Action::Build {
                    building: BuildingKind::Storage
                },
                Action::Build {
                    building: BuildingKind::Hut
                },
                Action::step(1, 0),
                Action::step(0, 1),
                Action::step(-1, 0),
                Action::step(0, -1),
            ]
        );
    }

    #[test]
    fn occupied_tile_offers_no_builds() {
        let mut scene = Scene::new(Stock::default(), Stock::default());
        scene.world.structures.push(Structure {
            kind: BuildingKind::Storage,
            pos: Position::new(1, 1),
            owner: AgentId(0),
        });
        let candidates = UtilityPolicy::candidates(&scene.observe());
        assert_eq!(candidates.len(), 4);
        assert!(candidates.iter().all(|a| matches!(a, Action::Move { .. })));
    }

    #[test]
    fn affordable_first_storage_beats_gathering() {
        let scene = Scene::new(Stock::new(5, 0, 0), Stock::new(0, 3, 2));
        let mut rng = SimRng::new(1);
        assert_eq!(
            greedy().decide(&scene.observe(), &mut rng),
            Action::Build {
                building: BuildingKind::Storage
            }
        );
    }

    #[test]
    fn unaffordable_storage_loses_to_exploring() {
        let scene = Scene::new(Stock::default(), Stock::new(0, 1, 0));
        let mut rng = SimRng::new(1);
        assert_eq!(greedy().decide(&scene.observe(), &mut rng), Action::step(1, 0));
    }

    #[test]
    fn food_beats_wood_with_default_weights() {
        let mut scene = Scene::new(Stock::new(2, 2, 0), Stock::default());
        scene.world.structures.push(Structure {
            kind: BuildingKind::Storage,
            pos: Position::new(1, 1),
            owner: AgentId(0),
        });
        let mut rng = SimRng::new(1);
        assert_eq!(
            greedy().decide(&scene.observe(), &mut rng),
            Action::Gather {
                resource: Resource::Food
            }
        );
    }

    #[test]
    fn ties_go_to_the_first_move() {
        let mut scene = Scene::new(Stock::default(), Stock::default());
        scene.world.structures.push(Structure {
            kind: BuildingKind::Hut,
            pos: Position::new(1, 1),
            owner: AgentId(0),
        });
        let mut rng = SimRng::new(1);
        assert_eq!(greedy().decide(&scene.observe(), &mut rng), Action::step(1, 0));
    }

    #[test]
    fn food_pressure_raises_food_value() {
        let mut scene = Scene::new(Stock::new(1, 0, 0), Stock::default());
        let policy = greedy();
        let gather = Action::Gather {
            resource: Resource::Food,
        };
        let calm = policy.score(&scene.observe(), &gather);
        let id = scene.ledger.found(Position::new(3, 3), AgentId(0));
        scene.ledger.get_mut(id).unwrap().population = 10;
        let hungry = policy.score(&scene.observe(), &gather);
        assert!(hungry > calm);
    }

    #[test]
    fn inventory_term_saturates() {
        let policy = greedy();
        let poor = Scene::new(Stock::default(), Stock::default());
        let rich = Scene::new(Stock::default(), Stock::new(1_000, 1_000, 1_000));
        let step = Action::step(1, 0);
        let base = policy.score(&poor.observe(), &step);
        let hoard = policy.score(&rich.observe(), &step);
        assert!(hoard > base);
        assert!(hoard - base <= 0.8 + 0.3 + 0.3 + 1e-9);

        let moderate = Scene::new(Stock::default(), Stock::new(6, 6, 6));
        let some = policy.score(&moderate.observe(), &step);
        assert!(some > base);
        assert!(hoard - some < some - base, "returns do not diminish");
    }

    #[test]
    fn bootstrap_requests_storage_when_holding_material() {
        let scene = Scene::new(Stock::new(3, 0, 0), Stock::new(0, 1, 0));
        let policy = greedy().with_storage_bootstrap(true);
        let mut rng = SimRng::new(1);
        assert_eq!(
            policy.decide(&scene.observe(), &mut rng),
            Action::Build {
                building: BuildingKind::Storage
            }
        );
    }
}
