pub mod action;
pub mod engine;
pub mod error;
pub mod policy;
pub mod rng;
pub mod runlog;
pub mod scenario;
pub mod search;
pub mod settlement;
pub mod snapshot;
pub mod systems;
pub mod world;

pub use action::{Action, ActionResolver, Outcome, RawAction, Reason};
pub use engine::{Engine, EngineBuilder, EngineSettings, RunPhase, RunReport};
pub use scenario::{Scenario, ScenarioLoader};
pub use search::{EvolutionarySearch, PolicyFile, SearchSettings};
pub use settlement::SettlementLedger;
pub use world::WorldState;
