use anyhow::Result;
use tracing::debug;

use crate::{
    engine::{SimState, System, SystemContext},
    rng::SimRng,
    runlog::Event,
    settlement::PopulationChangeKind,
};

pub struct SettlementSystem;

impl SettlementSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SettlementSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for SettlementSystem {
    fn name(&self) -> &str {
        "settlements"
    }

    fn run(
        &mut self,
        ctx: &mut SystemContext<'_>,
        state: &mut SimState,
        _rng: &mut SimRng,
    ) -> Result<()> {
        for change in state.ledger.economic_tick() {
            debug!(
                tick = ctx.tick,
                settlement = %change.settlement,
                before = change.before,
                after = change.after,
                kind = ?change.kind,
                "population changed"
            );
            let event = match change.kind {
                PopulationChangeKind::Grew => {
                    state.metrics.growth_events += 1;
                    Event::PopulationGrew {
                        tick: ctx.tick,
                        settlement: change.settlement,
                        population: change.after,
                    }
                }
                PopulationChangeKind::Starved => {
                    state.metrics.starvation_events += 1;
                    Event::PopulationStarved {
                        tick: ctx.tick,
                        settlement: change.settlement,
                        population: change.after,
                    }
                }
            };
            ctx.logger.event(&event)?;
        }
        Ok(())
    }
}
