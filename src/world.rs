use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Food,
    Wood,
    Stone,
}

impl Resource {
    /// Enumeration order used by gathering and candidate generation.
    pub const ALL: [Resource; 3] = [Resource::Food, Resource::Wood, Resource::Stone];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Food => "food",
            Resource::Wood => "wood",
            Resource::Stone => "stone",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "food" => Ok(Resource::Food),
            "wood" => Ok(Resource::Wood),
            "stone" => Ok(Resource::Stone),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingKind {
    Storage,
    Hut,
}

impl BuildingKind {
    pub const ALL: [BuildingKind; 2] = [BuildingKind::Storage, BuildingKind::Hut];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildingKind::Storage => "storage",
            BuildingKind::Hut => "hut",
        }
    }

    /// Storage may share a tile with other structures; every other kind claims it.
    pub fn claims_tile(self) -> bool {
        !matches!(self, BuildingKind::Storage)
    }
}

impl fmt::Display for BuildingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildingKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "storage" => Ok(BuildingKind::Storage),
            "hut" => Ok(BuildingKind::Hut),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }

    pub fn manhattan(self, other: Position) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

/// Whole-unit counts of the three resource kinds. Used for tiles, agent
/// inventories and build costs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    #[serde(default)]
    pub food: u32,
    #[serde(default)]
    pub wood: u32,
    #[serde(default)]
    pub stone: u32,
}

impl Stock {
    pub fn new(food: u32, wood: u32, stone: u32) -> Self {
        Self { food, wood, stone }
    }

    pub fn get(&self, resource: Resource) -> u32 {
        match resource {
            Resource::Food => self.food,
            Resource::Wood => self.wood,
            Resource::Stone => self.stone,
        }
    }

    pub fn get_mut(&mut self, resource: Resource) -> &mut u32 {
        match resource {
            Resource::Food => &mut self.food,
            Resource::Wood => &mut self.wood,
            Resource::Stone => &mut self.stone,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.food == 0 && self.wood == 0 && self.stone == 0
    }

    pub fn covers(&self, cost: &Stock) -> bool {
        Resource::ALL.iter().all(|&r| self.get(r) >= cost.get(r))
    }

    /// Removes one unit; returns false (and changes nothing) when empty.
    pub fn take_one(&mut self, resource: Resource) -> bool {
        let slot = self.get_mut(resource);
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }

    /// Adds one unit of every kind, saturating at `caps`.
    pub fn regrow(&mut self, caps: &Stock) {
        for resource in Resource::ALL {
            let cap = caps.get(resource);
            let slot = self.get_mut(resource);
            *slot = slot.saturating_add(1).min(cap);
        }
    }
}

pub type Tile = Stock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u32);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent_{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub pos: Position,
    pub inventory: Stock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    pub kind: BuildingKind,
    pub pos: Position,
    pub owner: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldState {
    pub tick: u64,
    pub width: i32,
    pub height: i32,
    pub caps: Stock,
    pub tiles: Vec<Tile>,
    pub agents: Vec<Agent>,
    pub structures: Vec<Structure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSummary {
    pub tick: u64,
    pub width: i32,
    pub height: i32,
    pub totals: Stock,
    pub agent_inventory: Stock,
    pub agents: usize,
    pub structures: usize,
    pub storages: usize,
    pub huts: usize,
}

impl WorldState {
    /// Empty world with every tile at zero.
    pub fn new(width: i32, height: i32, caps: Stock) -> Self {
        let area = (width.max(0) as usize) * (height.max(0) as usize);
        Self {
            tick: 0,
            width,
            height,
            caps,
            tiles: vec![Tile::default(); area],
            agents: Vec::new(),
            structures: Vec::new(),
        }
    }

    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    fn index(&self, pos: Position) -> Option<usize> {
        if !self.in_bounds(pos) {
            return None;
        }
        Some(pos.y as usize * self.width as usize + pos.x as usize)
    }

    pub fn tile(&self, pos: Position) -> Option<&Tile> {
        self.index(pos).and_then(|i| self.tiles.get(i))
    }

    pub fn tile_mut(&mut self, pos: Position) -> Option<&mut Tile> {
        let index = self.index(pos)?;
        self.tiles.get_mut(index)
    }

    /// Sets a tile, clamping each count to the world's caps.
    pub fn set_tile(&mut self, pos: Position, stock: Stock) {
        let caps = self.caps;
        if let Some(tile) = self.tile_mut(pos) {
            for resource in Resource::ALL {
                *tile.get_mut(resource) = stock.get(resource).min(caps.get(resource));
            }
        }
    }

    pub fn spawn_agent(&mut self, pos: Position, inventory: Stock) -> AgentId {
        let id = AgentId(self.agents.len() as u32);
        self.agents.push(Agent { id, pos, inventory });
        id
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id.0 as usize)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id.0 as usize)
    }

    /// First structure on the tile, in build order.
    pub fn structure_at(&self, pos: Position) -> Option<&Structure> {
        self.structures.iter().find(|s| s.pos == pos)
    }

    pub fn claimed(&self, pos: Position) -> bool {
        self.structures
            .iter()
            .any(|s| s.pos == pos && s.kind.claims_tile())
    }

    pub fn count_kind(&self, kind: BuildingKind) -> usize {
        self.structures.iter().filter(|s| s.kind == kind).count()
    }

    pub fn summary(&self) -> WorldSummary {
        let mut totals = Stock::default();
        for tile in &self.tiles {
            for resource in Resource::ALL {
                *totals.get_mut(resource) += tile.get(resource);
            }
        }
        let mut agent_inventory = Stock::default();
        for agent in &self.agents {
            for resource in Resource::ALL {
                *agent_inventory.get_mut(resource) += agent.inventory.get(resource);
            }
        }
        WorldSummary {
            tick: self.tick,
            width: self.width,
            height: self.height,
            totals,
            agent_inventory,
            agents: self.agents.len(),
            structures: self.structures.len(),
            storages: self.count_kind(BuildingKind::Storage),
            huts: self.count_kind(BuildingKind::Hut),
        }
    }
}
