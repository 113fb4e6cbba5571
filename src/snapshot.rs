//! Run directory layout and the records written once per run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    engine::RunMetrics,
    runlog::{JsonlRunLogger, SettlementSummary, SnapshotRecord},
    scenario::Scenario,
    settlement::SettlementLedger,
    world::{WorldState, WorldSummary},
};

pub const CONFIG_FILE: &str = "config.json";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const SNAPSHOTS_FILE: &str = "snapshots.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

pub fn capture(world: &WorldState, ledger: &SettlementLedger) -> SnapshotRecord {
    SnapshotRecord {
        tick: world.tick,
        world: world.summary(),
        total_population: ledger.total_population(),
        settlements: ledger.settlements().iter().map(SettlementSummary::from).collect(),
    }
}

/// Written once at run start so a run can be reproduced from its directory.
#[derive(Debug, Serialize)]
pub struct RunConfigRecord<'a> {
    pub run_id: &'a str,
    pub policy: &'a str,
    pub scenario: &'a Scenario,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scenario: String,
    pub seed: u64,
    pub ticks: u64,
    pub policy: String,
    pub score: f64,
    pub metrics: RunMetrics,
    pub world: WorldSummary,
    pub total_population: u64,
    pub settlements: Vec<SettlementSummary>,
}

/// `<runs_dir>/<run_id>/` and the files inside it.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    pub fn create(runs_dir: impl AsRef<Path>, run_id: &str) -> Result<Self> {
        let root = runs_dir.as_ref().join(run_id);
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create run directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn logger(&self) -> Result<JsonlRunLogger> {
        JsonlRunLogger::create(&self.root.join(EVENTS_FILE), &self.root.join(SNAPSHOTS_FILE))
    }

    pub fn write_config(&self, config: &RunConfigRecord<'_>) -> Result<PathBuf> {
        self.write_json(CONFIG_FILE, config)
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
        self.write_json(SUMMARY_FILE, summary)
    }

    fn write_json(&self, name: &str, value: &impl Serialize) -> Result<PathBuf> {
        let path = self.root.join(name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
