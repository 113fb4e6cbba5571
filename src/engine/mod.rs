use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::{
    error::ScenarioError,
    policy::Policy,
    rng::SimRng,
    runlog::{Event, RunLogger, SettlementSummary, Snapshot},
    scenario::{Scenario, ScoreWeights},
    settlement::SettlementLedger,
    snapshot::{self, RunConfigRecord, RunDirectory, RunSummary},
    systems::{AgentSystem, EnvironmentSystem, SettlementSystem},
    world::{BuildingKind, WorldState, WorldSummary},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    pub actions: u64,
    pub actions_ok: u64,
    pub actions_failed: u64,
    pub deposits: u64,
    pub food_deposited: u64,
    pub builds: BTreeMap<BuildingKind, u64>,
    pub settlements_founded: u64,
    pub growth_events: u64,
    pub starvation_events: u64,
}

/// Everything a single run mutates. Owned by exactly one [`Engine`].
#[derive(Debug, Clone)]
pub struct SimState {
    pub world: WorldState,
    pub ledger: SettlementLedger,
    pub metrics: RunMetrics,
}

impl SimState {
    pub fn score(&self, weights: &ScoreWeights) -> f64 {
        weights.population * self.ledger.total_population() as f64
            + weights.settlements * self.ledger.len() as f64
            + weights.structures * self.world.structures.len() as f64
            + weights.food_deposited * self.metrics.food_deposited as f64
            - weights.starvation * self.metrics.starvation_events as f64
    }
}

pub struct EngineSettings {
    pub run_id: String,
    pub scenario: Scenario,
}

pub struct EngineBuilder {
    settings: EngineSettings,
    systems: Vec<Box<dyn System>>,
    world: Option<WorldState>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            systems: Vec::new(),
            world: None,
        }
    }

    /// Regrowth, then agents, then the settlement economy.
    pub fn standard(settings: EngineSettings, policy: Box<dyn Policy>) -> Self {
        Self::new(settings)
            .with_system(EnvironmentSystem::new())
            .with_system(AgentSystem::new(policy))
            .with_system(SettlementSystem::new())
    }

    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    /// Skips world generation and starts from `world` instead.
    pub fn with_world(mut self, world: WorldState) -> Self {
        self.world = Some(world);
        self
    }

    pub fn build(self) -> Result<Engine, ScenarioError> {
        let scenario = &self.settings.scenario;
        scenario.validate()?;
        let mut rng = SimRng::new(scenario.seed);
        let world = match self.world {
            Some(world) => world,
            None => scenario.build_world(&mut rng),
        };
        let ledger = SettlementLedger::new(scenario.settlement.clone());
        Ok(Engine {
            rng,
            systems: self.systems,
            state: SimState {
                world,
                ledger,
                metrics: RunMetrics::default(),
            },
            phase: RunPhase::NotStarted,
            finished_logged: false,
            settings: self.settings,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    /// `tick` is the next tick to execute.
    Running { tick: u64 },
    Finished,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub ticks: u64,
    pub score: f64,
    pub metrics: RunMetrics,
    pub world: WorldSummary,
    pub total_population: u64,
    pub settlements: Vec<SettlementSummary>,
}

pub struct Engine {
    rng: SimRng,
    systems: Vec<Box<dyn System>>,
    state: SimState,
    phase: RunPhase,
    finished_logged: bool,
    settings: EngineSettings,
}

impl Engine {
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn state(&self) -> &SimState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SimState {
        &mut self.state
    }

    pub fn scenario(&self) -> &Scenario {
        &self.settings.scenario
    }

    pub fn run_id(&self) -> &str {
        &self.settings.run_id
    }

    pub fn score(&self) -> f64 {
        self.state.score(&self.settings.scenario.score)
    }

    /// Executes one tick, starting the run first if needed.
    pub fn step(&mut self, logger: &mut dyn RunLogger) -> Result<RunPhase> {
        let ticks = self.settings.scenario.ticks;
        let tick = match self.phase {
            RunPhase::Finished => return Ok(RunPhase::Finished),
            RunPhase::NotStarted => {
                self.start(logger)?;
                0
            }
            RunPhase::Running { tick } => tick,
        };
        if tick >= ticks {
            self.phase = RunPhase::Finished;
            return Ok(self.phase);
        }
        self.run_tick(tick, logger)?;
        self.phase = if tick + 1 >= ticks {
            RunPhase::Finished
        } else {
            RunPhase::Running { tick: tick + 1 }
        };
        Ok(self.phase)
    }

    /// Runs every remaining tick and scores the result.
    pub fn run(&mut self, logger: &mut dyn RunLogger) -> Result<RunReport> {
        while self.step(logger)? != RunPhase::Finished {}
        self.finish(logger)
    }

    fn start(&mut self, logger: &mut dyn RunLogger) -> Result<()> {
        let scenario = &self.settings.scenario;
        info!(
            run_id = %self.settings.run_id,
            scenario = %scenario.name,
            seed = scenario.seed,
            ticks = scenario.ticks,
            agents = self.state.world.agents.len(),
            "run started"
        );
        logger.event(&Event::RunStarted {
            seed: scenario.seed,
            ticks: scenario.ticks,
            agents: self.state.world.agents.len(),
        })
    }

    fn run_tick(&mut self, tick: u64, logger: &mut dyn RunLogger) -> Result<()> {
        self.state.world.tick = tick;
        logger.event(&Event::TickStarted { tick })?;
        {
            let mut ctx = SystemContext {
                tick,
                scenario: &self.settings.scenario,
                logger: &mut *logger,
            };
            for system in &mut self.systems {
                system
                    .run(&mut ctx, &mut self.state, &mut self.rng)
                    .with_context(|| format!("system '{}' failed at tick {tick}", system.name()))?;
            }
        }
        let every = self.settings.scenario.snapshot_every;
        if every > 0 && tick % every == 0 {
            let record = snapshot::capture(&self.state.world, &self.state.ledger);
            logger.snapshot(&Snapshot::Snapshot(record))?;
            logger.event(&Event::SnapshotSaved { tick })?;
        }
        Ok(())
    }

    fn finish(&mut self, logger: &mut dyn RunLogger) -> Result<RunReport> {
        let score = self.score();
        let ticks = self.settings.scenario.ticks;
        if !self.finished_logged {
            logger.event(&Event::RunFinished { ticks, score })?;
            self.finished_logged = true;
            info!(
                run_id = %self.settings.run_id,
                score,
                population = self.state.ledger.total_population(),
                settlements = self.state.ledger.len(),
                structures = self.state.world.structures.len(),
                "run finished"
            );
        }
        Ok(RunReport {
            run_id: self.settings.run_id.clone(),
            ticks,
            score,
            metrics: self.state.metrics.clone(),
            world: self.state.world.summary(),
            total_population: self.state.ledger.total_population(),
            settlements: self
                .state
                .ledger
                .settlements()
                .iter()
                .map(SettlementSummary::from)
                .collect(),
        })
    }
}

pub struct SystemContext<'a> {
    pub tick: u64,
    pub scenario: &'a Scenario,
    pub logger: &'a mut dyn RunLogger,
}

pub trait System {
    fn name(&self) -> &str;
    fn run(
        &mut self,
        ctx: &mut SystemContext<'_>,
        state: &mut SimState,
        rng: &mut SimRng,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub report: RunReport,
    pub dir: PathBuf,
}

/// Runs a scenario with the standard systems and writes the full run
/// directory: config, event and snapshot streams, summary.
pub fn record_run(
    scenario: &Scenario,
    policy: Box<dyn Policy>,
    run_id: &str,
    runs_dir: &Path,
) -> Result<RecordedRun> {
    let policy_name = policy.name().to_string();
    let dir = RunDirectory::create(runs_dir, run_id)?;
    dir.write_config(&RunConfigRecord {
        run_id,
        policy: &policy_name,
        scenario,
    })?;

    let settings = EngineSettings {
        run_id: run_id.to_string(),
        scenario: scenario.clone(),
    };
    let mut engine = EngineBuilder::standard(settings, policy).build()?;
    let mut logger = dir.logger()?;
    let report = engine.run(&mut logger)?;

    dir.write_summary(&RunSummary {
        run_id: report.run_id.clone(),
        scenario: scenario.name.clone(),
        seed: scenario.seed,
        ticks: report.ticks,
        policy: policy_name,
        score: report.score,
        metrics: report.metrics.clone(),
        world: report.world.clone(),
        total_population: report.total_population,
        settlements: report.settlements.clone(),
    })?;
    Ok(RecordedRun {
        report,
        dir: dir.path().to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runlog::MemoryRunLogger;

    struct Counter {
        seen: Vec<u64>,
    }

    impl System for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn run(
            &mut self,
            ctx: &mut SystemContext<'_>,
            state: &mut SimState,
            _rng: &mut SimRng,
        ) -> Result<()> {
            assert_eq!(state.world.tick, ctx.tick);
            self.seen.push(ctx.tick);
            Ok(())
        }
    }

    struct Failing;

    impl System for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(
            &mut self,
            _ctx: &mut SystemContext<'_>,
            _state: &mut SimState,
            _rng: &mut SimRng,
        ) -> Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn settings(ticks: u64, snapshot_every: u64) -> EngineSettings {
        let scenario = Scenario::default().with_overrides(None, Some(ticks), Some(snapshot_every));
        EngineSettings {
            run_id: "test".into(),
            scenario,
        }
    }

    #[test]
    fn phases_advance_through_every_tick() {
        let mut engine = EngineBuilder::new(settings(3, 0)).build().unwrap();
        let mut logger = MemoryRunLogger::new();
        assert_eq!(engine.phase(), RunPhase::NotStarted);
        assert_eq!(engine.step(&mut logger).unwrap(), RunPhase::Running { tick: 1 });
        assert_eq!(engine.step(&mut logger).unwrap(), RunPhase::Running { tick: 2 });
        assert_eq!(engine.step(&mut logger).unwrap(), RunPhase::Finished);
        assert_eq!(engine.step(&mut logger).unwrap(), RunPhase::Finished);
        assert_eq!(engine.state().world.tick, 2);
    }

    #[test]
    fn zero_ticks_finishes_without_ticking() {
        let mut engine = EngineBuilder::new(settings(0, 1)).build().unwrap();
        let mut logger = MemoryRunLogger::new();
        let report = engine.run(&mut logger).unwrap();
        assert_eq!(report.ticks, 0);
        assert!(logger.snapshots.is_empty());
        assert_eq!(logger.events.len(), 2);
        assert!(logger.events[0].contains("run_started"));
        assert!(logger.events[1].contains("run_finished"));
    }

    #[test]
    fn every_tick_is_announced_before_systems_run() {
        let mut engine = EngineBuilder::new(settings(4, 0))
            .with_system(Counter { seen: Vec::new() })
            .build()
            .unwrap();
        let mut logger = MemoryRunLogger::new();
        engine.run(&mut logger).unwrap();
        let ticks: Vec<_> = logger
            .events
            .iter()
            .filter(|line| line.contains("tick_started"))
            .collect();
        assert_eq!(ticks.len(), 4);
    }

    #[test]
    fn snapshots_follow_cadence_including_tick_zero() {
        let mut engine = EngineBuilder::new(settings(7, 3)).build().unwrap();
        let mut logger = MemoryRunLogger::new();
        engine.run(&mut logger).unwrap();
        let ticks: Vec<u64> = logger
            .snapshots
            .iter()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                assert_eq!(value["type"], "snapshot");
                value["tick"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(ticks, vec![0, 3, 6]);
    }

    #[test]
    fn system_errors_name_the_system() {
        let mut engine = EngineBuilder::new(settings(2, 0))
            .with_system(Failing)
            .build()
            .unwrap();
        let err = engine.run(&mut MemoryRunLogger::new()).unwrap_err();
        assert!(format!("{err:#}").contains("failing"));
    }

    #[test]
    fn invalid_scenario_fails_at_build() {
        let mut scenario = Scenario::default();
        scenario.buildings.remove(&BuildingKind::Hut);
        let result = EngineBuilder::new(EngineSettings {
            run_id: "bad".into(),
            scenario,
        })
        .build();
        assert!(matches!(result, Err(ScenarioError::MissingBuildCost(BuildingKind::Hut))));
    }

    #[test]
    fn score_uses_configured_weights() {
        let mut engine = EngineBuilder::new(settings(1, 0))
            .with_world(WorldState::new(4, 4, Scenario::default().world.caps()))
            .build()
            .unwrap();
        let state = engine.state_mut();
        state.ledger.found(crate::world::Position::new(0, 0), crate::world::AgentId(0));
        state.metrics.food_deposited = 7;
        state.metrics.starvation_events = 1;
        // 10 * 2 + 25 * 1 + 5 * 0 + 7 - 20 * 1
        assert_eq!(engine.score(), 32.0);
    }
}
