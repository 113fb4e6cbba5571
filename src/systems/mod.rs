mod agents;
mod environment;
mod settlement;

pub use agents::AgentSystem;
pub use environment::EnvironmentSystem;
pub use settlement::SettlementSystem;
