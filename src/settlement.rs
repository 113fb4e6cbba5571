use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    scenario::SettlementRules,
    world::{AgentId, Position, Resource, Stock},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementId(pub u32);

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "settlement_{}", self.0)
    }
}

/// Settlement stores. Fractional because per-capita consumption need not be
/// a whole number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stockpile {
    pub food: f64,
    pub wood: f64,
    pub stone: f64,
}

impl Stockpile {
    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Food => self.food,
            Resource::Wood => self.wood,
            Resource::Stone => self.stone,
        }
    }

    fn get_mut(&mut self, resource: Resource) -> &mut f64 {
        match resource {
            Resource::Food => &mut self.food,
            Resource::Wood => &mut self.wood,
            Resource::Stone => &mut self.stone,
        }
    }

    /// Units that can be spent on construction.
    pub fn whole_units(&self, resource: Resource) -> u32 {
        let value = self.get(resource).max(0.0).floor();
        if value >= u32::MAX as f64 {
            u32::MAX
        } else {
            value as u32
        }
    }

    pub fn add(&mut self, resource: Resource, units: f64) {
        let slot = self.get_mut(resource);
        *slot = (*slot + units).max(0.0);
    }

    /// Removes up to `units`, never driving the store negative.
    pub fn withdraw(&mut self, resource: Resource, units: u32) -> u32 {
        let taken = units.min(self.whole_units(resource));
        let slot = self.get_mut(resource);
        *slot = (*slot - taken as f64).max(0.0);
        taken
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub anchor: Position,
    pub owner: AgentId,
    pub population: u32,
    pub stockpile: Stockpile,
    pub surplus_ticks: u32,
    pub deficit_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationChangeKind {
    Grew,
    Starved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationChange {
    pub settlement: SettlementId,
    pub kind: PopulationChangeKind,
    pub before: u32,
    pub after: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub settlement: SettlementId,
    pub founded: bool,
}

/// Owns every settlement of a run and the structure-position to settlement
/// mapping. Discarded with the run.
#[derive(Debug, Clone)]
pub struct SettlementLedger {
    rules: SettlementRules,
    settlements: Vec<Settlement>,
    links: BTreeMap<Position, SettlementId>,
}

impl SettlementLedger {
    pub fn new(rules: SettlementRules) -> Self {
        Self {
            rules,
            settlements: Vec::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn settlements(&self) -> &[Settlement] {
        &self.settlements
    }

    pub fn len(&self) -> usize {
        self.settlements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settlements.is_empty()
    }

    pub fn get(&self, id: SettlementId) -> Option<&Settlement> {
        self.settlements.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: SettlementId) -> Option<&mut Settlement> {
        self.settlements.get_mut(id.0 as usize)
    }

    pub fn linked(&self, pos: Position) -> Option<SettlementId> {
        self.links.get(&pos).copied()
    }

    pub fn total_population(&self) -> u64 {
        self.settlements.iter().map(|s| s.population as u64).sum()
    }

    /// Creates a settlement anchored at `anchor` with the configured
    /// starting population.
    pub fn found(&mut self, anchor: Position, owner: AgentId) -> SettlementId {
        let id = SettlementId(self.settlements.len() as u32);
        self.settlements.push(Settlement {
            id,
            anchor,
            owner,
            population: self.rules.initial_population,
            stockpile: Stockpile::default(),
            surplus_ticks: 0,
            deficit_ticks: 0,
        });
        id
    }

    /// Nearest settlement by anchor distance; ties go to the older settlement.
    pub fn nearest(&self, pos: Position) -> Option<(SettlementId, u32)> {
        self.settlements
            .iter()
            .map(|s| (s.id, s.anchor.manhattan(pos)))
            .min_by_key(|&(id, distance)| (distance, id))
    }

    /// Settlement a structure at `pos` would belong to without founding a new one.
    pub fn would_join(&self, pos: Position) -> Option<SettlementId> {
        if let Some(id) = self.linked(pos) {
            return Some(id);
        }
        self.nearest(pos)
            .filter(|&(_, distance)| distance <= self.rules.link_distance)
            .map(|(id, _)| id)
    }

    /// Links a structure position. An existing link is never reassigned.
    pub fn link(&mut self, pos: Position, owner: AgentId) -> Link {
        if let Some(settlement) = self.would_join(pos) {
            self.links.insert(pos, settlement);
            return Link {
                settlement,
                founded: false,
            };
        }
        let settlement = self.found(pos, owner);
        self.links.insert(pos, settlement);
        Link {
            settlement,
            founded: true,
        }
    }

    /// Settlement an agent at `pos` may deposit into: the closest linked
    /// structure or anchor within the deposit radius.
    pub fn deposit_target(&self, pos: Position) -> Option<SettlementId> {
        let radius = self.rules.deposit_radius;
        let anchors = self.settlements.iter().map(|s| (s.anchor, s.id));
        let structures = self.links.iter().map(|(&p, &id)| (p, id));
        anchors
            .chain(structures)
            .map(|(p, id)| (p.manhattan(pos), id))
            .filter(|&(distance, _)| distance <= radius)
            .min()
            .map(|(_, id)| id)
    }

    /// Moves the whole inventory of each kind into the settlement. Returns
    /// what was transferred.
    pub fn deposit(&mut self, id: SettlementId, inventory: &mut Stock) -> Stock {
        let Some(settlement) = self.get_mut(id) else {
            return Stock::default();
        };
        let moved = *inventory;
        for resource in Resource::ALL {
            let units = inventory.get(resource);
            if units > 0 {
                settlement.stockpile.add(resource, units as f64);
                *inventory.get_mut(resource) = 0;
            }
        }
        moved
    }

    /// Consumption and hysteretic growth/starvation, once per tick.
    pub fn economic_tick(&mut self) -> Vec<PopulationChange> {
        let rules = &self.rules;
        let mut changes = Vec::new();
        for settlement in self.settlements.iter_mut() {
            let required = settlement.population as f64 * rules.consumption_per_capita;
            let stock = &mut settlement.stockpile;
            if stock.food >= required {
                stock.food = (stock.food - required).max(0.0);
                settlement.deficit_ticks = 0;
                if stock.food >= required + rules.surplus_buffer {
                    settlement.surplus_ticks += 1;
                    if settlement.surplus_ticks >= rules.surplus_ticks {
                        let before = settlement.population;
                        settlement.population = before.saturating_add(rules.growth_step);
                        settlement.surplus_ticks = 0;
                        changes.push(PopulationChange {
                            settlement: settlement.id,
                            kind: PopulationChangeKind::Grew,
                            before,
                            after: settlement.population,
                        });
                    }
                } else {
                    settlement.surplus_ticks = 0;
                }
            } else {
                stock.food = 0.0;
                settlement.surplus_ticks = 0;
                settlement.deficit_ticks += 1;
                if settlement.deficit_ticks >= rules.deficit_ticks {
                    let before = settlement.population;
                    settlement.population = before.saturating_sub(rules.starvation_step);
                    settlement.deficit_ticks = 0;
                    changes.push(PopulationChange {
                        settlement: settlement.id,
                        kind: PopulationChangeKind::Starved,
                        before,
                        after: settlement.population,
                    });
                }
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> SettlementRules {
        SettlementRules {
            consumption_per_capita: 1.0,
            surplus_buffer: 2.0,
            ..SettlementRules::default()
        }
    }

    fn ledger_with_one(population: u32, food: f64) -> (SettlementLedger, SettlementId) {
        let mut ledger = SettlementLedger::new(rules());
        let id = ledger.found(Position::new(0, 0), AgentId(0));
        let settlement = ledger.get_mut(id).unwrap();
        settlement.population = population;
        settlement.stockpile.food = food;
        (ledger, id)
    }

    #[test]
    fn single_deficit_does_not_starve() {
        let (mut ledger, id) = ledger_with_one(2, 0.0);
        let changes = ledger.economic_tick();
        let settlement = ledger.get(id).unwrap();
        assert!(changes.is_empty());
        assert_eq!(settlement.stockpile.food, 0.0);
        assert_eq!(settlement.deficit_ticks, 1);
        assert_eq!(settlement.population, 2);
    }

    #[test]
    fn three_deficits_starve_by_one_step() {
        let (mut ledger, id) = ledger_with_one(2, 0.0);
        ledger.economic_tick();
        ledger.economic_tick();
        let changes = ledger.economic_tick();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, PopulationChangeKind::Starved);
        let settlement = ledger.get(id).unwrap();
        assert_eq!(settlement.population, 1);
        assert_eq!(settlement.deficit_ticks, 0);
    }

    #[test]
    fn partial_payment_is_not_retained() {
        let (mut ledger, id) = ledger_with_one(4, 3.5);
        ledger.economic_tick();
        assert_eq!(ledger.get(id).unwrap().stockpile.food, 0.0);
    }

    #[test]
    fn sustained_surplus_grows_population() {
        let (mut ledger, id) = ledger_with_one(2, 100.0);
        assert!(ledger.economic_tick().is_empty());
        assert!(ledger.economic_tick().is_empty());
        let changes = ledger.economic_tick();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, PopulationChangeKind::Grew);
        let settlement = ledger.get(id).unwrap();
        assert_eq!(settlement.population, 3);
        assert_eq!(settlement.surplus_ticks, 0);
        assert_eq!(settlement.stockpile.food, 94.0);
    }

    #[test]
    fn period_two_oscillation_never_changes_population() {
        let (mut ledger, id) = ledger_with_one(2, 0.0);
        for tick in 0..60 {
            // Plenty on even ticks, nothing on odd ticks.
            ledger.get_mut(id).unwrap().stockpile.food = if tick % 2 == 0 { 50.0 } else { 0.0 };
            assert!(ledger.economic_tick().is_empty(), "tick {tick}");
            assert_eq!(ledger.get(id).unwrap().population, 2);
        }
    }

    #[test]
    fn starvation_stops_at_zero() {
        let (mut ledger, id) = ledger_with_one(1, 0.0);
        let mut starvations = 0;
        for _ in 0..12 {
            starvations += ledger.economic_tick().len();
        }
        assert_eq!(ledger.get(id).unwrap().population, 0);
        assert_eq!(starvations, 1);
    }

    #[test]
    fn link_joins_nearby_and_founds_far() {
        let mut ledger = SettlementLedger::new(rules());
        let first = ledger.link(Position::new(0, 0), AgentId(0));
        assert!(first.founded);
        let near = ledger.link(Position::new(3, 4), AgentId(1));
        assert_eq!(near.settlement, first.settlement);
        assert!(!near.founded);
        let far = ledger.link(Position::new(20, 20), AgentId(1));
        assert!(far.founded);
        assert_ne!(far.settlement, first.settlement);
        assert_eq!(ledger.linked(Position::new(3, 4)), Some(first.settlement));
    }

    #[test]
    fn existing_link_is_stable() {
        let mut ledger = SettlementLedger::new(rules());
        let a = ledger.link(Position::new(5, 5), AgentId(0)).settlement;
        ledger.found(Position::new(5, 6), AgentId(1));
        assert_eq!(ledger.link(Position::new(5, 5), AgentId(1)).settlement, a);
    }

    #[test]
    fn deposit_moves_everything_and_zeroes_inventory() {
        let (mut ledger, id) = ledger_with_one(2, 1.5);
        let mut inventory = Stock::new(3, 0, 2);
        assert_eq!(ledger.deposit_target(Position::new(1, 0)), Some(id));
        assert_eq!(ledger.deposit_target(Position::new(2, 0)), None);
        let moved = ledger.deposit(id, &mut inventory);
        assert_eq!(moved, Stock::new(3, 0, 2));
        assert!(inventory.is_empty());
        let stock = ledger.get(id).unwrap().stockpile;
        assert_eq!(stock.food, 4.5);
        assert_eq!(stock.stone, 2.0);
    }

    #[test]
    fn withdraw_takes_whole_units_only() {
        let mut stock = Stockpile {
            food: 0.0,
            wood: 2.75,
            stone: 0.0,
        };
        assert_eq!(stock.whole_units(Resource::Wood), 2);
        assert_eq!(stock.withdraw(Resource::Wood, 5), 2);
        assert!((stock.wood - 0.75).abs() < 1e-9);
    }
}
