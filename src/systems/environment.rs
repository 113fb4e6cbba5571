use anyhow::Result;

use crate::{
    engine::{SimState, System, SystemContext},
    rng::SimRng,
    runlog::Event,
    world::Position,
};

/// Periodic regrowth on randomly chosen tiles. The only source of new
/// resources after world generation.
pub struct EnvironmentSystem;

impl EnvironmentSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvironmentSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for EnvironmentSystem {
    fn name(&self) -> &str {
        "environment"
    }

    fn run(
        &mut self,
        ctx: &mut SystemContext<'_>,
        state: &mut SimState,
        rng: &mut SimRng,
    ) -> Result<()> {
        let regrowth = &ctx.scenario.regrowth;
        if regrowth.tiles == 0 || regrowth.every_ticks == 0 || ctx.tick % regrowth.every_ticks != 0
        {
            return Ok(());
        }
        let world = &mut state.world;
        let caps = world.caps;
        let mut tiles = Vec::with_capacity(regrowth.tiles as usize);
        for _ in 0..regrowth.tiles {
            let x = rng.randint(0, world.width as i64 - 1) as i32;
            let y = rng.randint(0, world.height as i64 - 1) as i32;
            let pos = Position::new(x, y);
            if let Some(tile) = world.tile_mut(pos) {
                tile.regrow(&caps);
            }
            tiles.push(pos);
        }
        ctx.logger.event(&Event::Regrowth {
            tick: ctx.tick,
            tiles,
        })
    }
}
