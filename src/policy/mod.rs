//! Agent decision making. A policy sees one [`Observation`] per tick and
//! returns an [`Action`]; it keeps no memory between ticks.

mod random;
mod utility;

use std::collections::BTreeMap;

pub use random::RandomPolicy;
pub use utility::{UtilityPolicy, Weights, DEFAULT_WEIGHTS, EPSILON_MAX};

use crate::{
    action::Action,
    rng::SimRng,
    scenario::BuildingRule,
    settlement::{Settlement, SettlementLedger},
    world::{AgentId, BuildingKind, Position, Resource, Stock, Structure, WorldState},
};

pub trait Policy: Send {
    fn name(&self) -> &str;
    fn decide(&self, obs: &Observation<'_>, rng: &mut SimRng) -> Action;
}

/// Read-only view of shared world state handed to every policy.
#[derive(Debug, Clone, Copy)]
pub struct WorldView<'a> {
    pub structures: &'a [Structure],
    pub settlements: &'a [Settlement],
    pub buildings: &'a BTreeMap<BuildingKind, BuildingRule>,
}

impl<'a> WorldView<'a> {
    pub fn has_kind(&self, kind: BuildingKind) -> bool {
        self.structures.iter().any(|s| s.kind == kind)
    }

    pub fn total_population(&self) -> u64 {
        self.settlements.iter().map(|s| s.population as u64).sum()
    }

    pub fn total_food(&self) -> f64 {
        self.settlements.iter().map(|s| s.stockpile.food).sum()
    }

    pub fn cost(&self, kind: BuildingKind) -> Option<&'a Stock> {
        self.buildings.get(&kind).map(|rule| &rule.cost)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub tick: u64,
    pub agent: AgentId,
    pub pos: Position,
    pub width: i32,
    pub height: i32,
    pub tile: Stock,
    pub inventory: Stock,
    pub structure: Option<BuildingKind>,
    pub view: WorldView<'a>,
}

impl<'a> Observation<'a> {
    pub fn capture(
        world: &'a WorldState,
        ledger: &'a SettlementLedger,
        buildings: &'a BTreeMap<BuildingKind, BuildingRule>,
        agent: AgentId,
    ) -> Option<Self> {
        let state = world.agent(agent)?;
        Some(Self {
            tick: world.tick,
            agent,
            pos: state.pos,
            width: world.width,
            height: world.height,
            tile: world.tile(state.pos).copied().unwrap_or_default(),
            inventory: state.inventory,
            structure: world.structure_at(state.pos).map(|s| s.kind),
            view: WorldView {
                structures: &world.structures,
                settlements: ledger.settlements(),
                buildings,
            },
        })
    }
}

/// Gather whatever the tile offers, food first, or take a random step.
pub(crate) fn forage_or_wander(
    obs: &Observation<'_>,
    moves: &[(i32, i32)],
    rng: &mut SimRng,
) -> Action {
    if let Some(action) = first_gather(&obs.tile) {
        return action;
    }
    let (dx, dy) = rng.pick(moves).copied().unwrap_or((1, 0));
    Action::step(dx, dy)
}

fn first_gather(tile: &Stock) -> Option<Action> {
    Resource::ALL
        .into_iter()
        .find(|&resource| tile.get(resource) > 0)
        .map(|resource| Action::Gather { resource })
}
