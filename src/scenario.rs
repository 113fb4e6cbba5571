use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::ScenarioError,
    rng::SimRng,
    world::{BuildingKind, Position, Stock, WorldState},
};

fn default_name() -> String {
    "default".to_string()
}

fn default_seed() -> u64 {
    123
}

fn default_ticks() -> u64 {
    200
}

fn default_snapshot_every() -> u64 {
    10
}

fn default_dimension() -> i32 {
    32
}

fn default_max_resource() -> u32 {
    5
}

fn default_agents() -> u32 {
    8
}

fn default_regrowth_every() -> u64 {
    5
}

fn default_regrowth_tiles() -> u32 {
    10
}

fn default_link_distance() -> u32 {
    8
}

fn default_deposit_radius() -> u32 {
    1
}

fn default_initial_population() -> u32 {
    2
}

fn default_consumption() -> f64 {
    0.25
}

fn default_surplus_buffer() -> f64 {
    2.0
}

fn default_step() -> u32 {
    1
}

fn default_hysteresis() -> u32 {
    3
}

fn default_buildings() -> BTreeMap<BuildingKind, BuildingRule> {
    let mut table = BTreeMap::new();
    table.insert(
        BuildingKind::Storage,
        BuildingRule {
            cost: Stock::new(0, 3, 2),
            requires: None,
        },
    );
    table.insert(
        BuildingKind::Hut,
        BuildingRule {
            cost: Stock::new(0, 2, 1),
            requires: Some(BuildingKind::Storage),
        },
    );
    table
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    /// Snapshot cadence in ticks; 0 disables snapshots.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub regrowth: RegrowthConfig,
    #[serde(default = "default_buildings")]
    pub buildings: BTreeMap<BuildingKind, BuildingRule>,
    #[serde(default)]
    pub settlement: SettlementRules,
    #[serde(default)]
    pub score: ScoreWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_dimension")]
    pub width: i32,
    #[serde(default = "default_dimension")]
    pub height: i32,
    #[serde(default = "default_max_resource")]
    pub max_food: u32,
    #[serde(default = "default_max_resource")]
    pub max_wood: u32,
    #[serde(default = "default_max_resource")]
    pub max_stone: u32,
    #[serde(default = "default_agents")]
    pub agents: u32,
}

impl WorldConfig {
    pub fn caps(&self) -> Stock {
        Stock::new(self.max_food, self.max_wood, self.max_stone)
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: default_dimension(),
            height: default_dimension(),
            max_food: default_max_resource(),
            max_wood: default_max_resource(),
            max_stone: default_max_resource(),
            agents: default_agents(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegrowthConfig {
    #[serde(default = "default_regrowth_every")]
    pub every_ticks: u64,
    #[serde(default = "default_regrowth_tiles")]
    pub tiles: u32,
}

impl Default for RegrowthConfig {
    fn default() -> Self {
        Self {
            every_ticks: default_regrowth_every(),
            tiles: default_regrowth_tiles(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRule {
    pub cost: Stock,
    #[serde(default)]
    pub requires: Option<BuildingKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRules {
    /// A new structure joins the nearest settlement whose anchor is at most
    /// this Manhattan distance away; otherwise it founds a new one.
    #[serde(default = "default_link_distance")]
    pub link_distance: u32,
    #[serde(default = "default_deposit_radius")]
    pub deposit_radius: u32,
    #[serde(default = "default_initial_population")]
    pub initial_population: u32,
    #[serde(default = "default_consumption")]
    pub consumption_per_capita: f64,
    #[serde(default = "default_surplus_buffer")]
    pub surplus_buffer: f64,
    #[serde(default = "default_step")]
    pub growth_step: u32,
    #[serde(default = "default_step")]
    pub starvation_step: u32,
    #[serde(default = "default_hysteresis")]
    pub surplus_ticks: u32,
    #[serde(default = "default_hysteresis")]
    pub deficit_ticks: u32,
}

impl Default for SettlementRules {
    fn default() -> Self {
        Self {
            link_distance: default_link_distance(),
            deposit_radius: default_deposit_radius(),
            initial_population: default_initial_population(),
            consumption_per_capita: default_consumption(),
            surplus_buffer: default_surplus_buffer(),
            growth_step: default_step(),
            starvation_step: default_step(),
            surplus_ticks: default_hysteresis(),
            deficit_ticks: default_hysteresis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "ScoreWeights::default_population")]
    pub population: f64,
    #[serde(default = "ScoreWeights::default_settlements")]
    pub settlements: f64,
    #[serde(default = "ScoreWeights::default_structures")]
    pub structures: f64,
    #[serde(default = "ScoreWeights::default_food_deposited")]
    pub food_deposited: f64,
    #[serde(default = "ScoreWeights::default_starvation")]
    pub starvation: f64,
}

impl ScoreWeights {
    fn default_population() -> f64 {
        10.0
    }

    fn default_settlements() -> f64 {
        25.0
    }

    fn default_structures() -> f64 {
        5.0
    }

    fn default_food_deposited() -> f64 {
        1.0
    }

    fn default_starvation() -> f64 {
        20.0
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            population: Self::default_population(),
            settlements: Self::default_settlements(),
            structures: Self::default_structures(),
            food_deposited: Self::default_food_deposited(),
            starvation: Self::default_starvation(),
        }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: default_name(),
            seed: default_seed(),
            ticks: default_ticks(),
            snapshot_every: default_snapshot_every(),
            world: WorldConfig::default(),
            regrowth: RegrowthConfig::default(),
            buildings: default_buildings(),
            settlement: SettlementRules::default(),
            score: ScoreWeights::default(),
        }
    }
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario, ScenarioError> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path).map_err(|source| ScenarioError::Io {
            path: path.clone(),
            source,
        })?;
        Scenario::from_yaml(&data)
    }
}

impl Scenario {
    pub fn from_yaml(text: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = if text.trim().is_empty() {
            Scenario::default()
        } else {
            serde_yaml::from_str(text)?
        };
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.world.width <= 0 || self.world.height <= 0 {
            return Err(ScenarioError::Validation(format!(
                "world must have positive dimensions, got {}x{}",
                self.world.width, self.world.height
            )));
        }
        for kind in BuildingKind::ALL {
            let rule = self
                .buildings
                .get(&kind)
                .ok_or(ScenarioError::MissingBuildCost(kind))?;
            if rule.requires == Some(kind) {
                return Err(ScenarioError::Validation(format!(
                    "building kind '{kind}' cannot require itself"
                )));
            }
        }
        let rules = &self.settlement;
        if !rules.consumption_per_capita.is_finite() || rules.consumption_per_capita < 0.0 {
            return Err(ScenarioError::Validation(
                "consumption_per_capita must be a non-negative number".into(),
            ));
        }
        if !rules.surplus_buffer.is_finite() || rules.surplus_buffer < 0.0 {
            return Err(ScenarioError::Validation(
                "surplus_buffer must be a non-negative number".into(),
            ));
        }
        if rules.surplus_ticks == 0 || rules.deficit_ticks == 0 {
            return Err(ScenarioError::Validation(
                "hysteresis thresholds must be at least one tick".into(),
            ));
        }
        if self.regrowth.tiles > 0 && self.regrowth.every_ticks == 0 {
            return Err(ScenarioError::Validation(
                "regrowth.every_ticks must be positive when regrowth is enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn with_overrides(
        mut self,
        seed: Option<u64>,
        ticks: Option<u64>,
        snapshot_every: Option<u64>,
    ) -> Self {
        if let Some(seed) = seed {
            self.seed = seed;
        }
        if let Some(ticks) = ticks {
            self.ticks = ticks;
        }
        if let Some(every) = snapshot_every {
            self.snapshot_every = every;
        }
        self
    }

    pub fn rule(&self, kind: BuildingKind) -> Option<&BuildingRule> {
        self.buildings.get(&kind)
    }

    /// Draws every tile uniformly in `[0, max]`, row by row, then places the
    /// agents in creation order.
    pub fn build_world(&self, rng: &mut SimRng) -> WorldState {
        let caps = self.world.caps();
        let mut world = WorldState::new(self.world.width, self.world.height, caps);
        for tile in world.tiles.iter_mut() {
            tile.food = rng.randint(0, caps.food as i64) as u32;
            tile.wood = rng.randint(0, caps.wood as i64) as u32;
            tile.stone = rng.randint(0, caps.stone as i64) as u32;
        }
        for _ in 0..self.world.agents {
            let x = rng.randint(0, self.world.width as i64 - 1) as i32;
            let y = rng.randint(0, self.world.height as i64 - 1) as i32;
            world.spawn_agent(Position::new(x, y), Stock::default());
        }
        world
    }
}
