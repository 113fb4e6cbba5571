use anyhow::Result;
use tracing::debug;

use crate::{
    action::ActionResolver,
    engine::{SimState, System, SystemContext},
    policy::{Observation, Policy},
    rng::SimRng,
    runlog::Event,
    scenario::Scenario,
};

/// Deposit, observe, decide, resolve for every agent in creation order.
pub struct AgentSystem {
    policy: Box<dyn Policy>,
}

impl AgentSystem {
    pub fn new(policy: Box<dyn Policy>) -> Self {
        Self { policy }
    }
}

impl System for AgentSystem {
    fn name(&self) -> &str {
        "agents"
    }

    fn run(
        &mut self,
        ctx: &mut SystemContext<'_>,
        state: &mut SimState,
        rng: &mut SimRng,
    ) -> Result<()> {
        let scenario: &Scenario = ctx.scenario;
        let tick = ctx.tick;
        let resolver = ActionResolver::new(&scenario.buildings);

        for index in 0..state.world.agents.len() {
            let id = state.world.agents[index].id;
            let pos = state.world.agents[index].pos;

            // Decisions see the post-deposit inventory.
            if let Some(target) = state.ledger.deposit_target(pos) {
                let inventory = &mut state.world.agents[index].inventory;
                let moved = state.ledger.deposit(target, inventory);
                if !moved.is_empty() {
                    state.metrics.deposits += 1;
                    state.metrics.food_deposited += moved.food as u64;
                    ctx.logger.event(&Event::Deposit {
                        tick,
                        agent: id,
                        settlement: target,
                        food: moved.food,
                        wood: moved.wood,
                        stone: moved.stone,
                    })?;
                }
            }

            let Some(obs) =
                Observation::capture(&state.world, &state.ledger, &scenario.buildings, id)
            else {
                continue;
            };
            let action = self.policy.decide(&obs, rng);
            let resolution = resolver.resolve(id, &action, &mut state.world, &mut state.ledger);

            let outcome = resolution.outcome;
            state.metrics.actions += 1;
            if outcome.ok {
                state.metrics.actions_ok += 1;
            } else {
                state.metrics.actions_failed += 1;
            }
            ctx.logger.event(&Event::Action {
                tick,
                agent: id,
                action,
                ok: outcome.ok,
                reason: outcome.reason,
            })?;

            if let Some(built) = resolution.built {
                *state.metrics.builds.entry(built.kind).or_insert(0) += 1;
                if built.link.founded {
                    state.metrics.settlements_founded += 1;
                    debug!(
                        tick,
                        settlement = %built.link.settlement,
                        x = built.pos.x,
                        y = built.pos.y,
                        "settlement founded"
                    );
                    ctx.logger.event(&Event::SettlementFounded {
                        tick,
                        settlement: built.link.settlement,
                        anchor: built.pos,
                        owner: id,
                    })?;
                }
            }
        }
        Ok(())
    }
}
