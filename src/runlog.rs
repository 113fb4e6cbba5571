//! Append-only event and snapshot streams for a run, plus run-id sources.

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use rand::Rng;
use serde::Serialize;

use crate::{
    action::{Action, Reason},
    settlement::{Settlement, SettlementId},
    world::{AgentId, Position, WorldSummary},
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        seed: u64,
        ticks: u64,
        agents: usize,
    },
    TickStarted {
        tick: u64,
    },
    Regrowth {
        tick: u64,
        tiles: Vec<Position>,
    },
    Deposit {
        tick: u64,
        agent: AgentId,
        settlement: SettlementId,
        food: u32,
        wood: u32,
        stone: u32,
    },
    Action {
        tick: u64,
        agent: AgentId,
        action: Action,
        ok: bool,
        reason: Reason,
    },
    SettlementFounded {
        tick: u64,
        settlement: SettlementId,
        anchor: Position,
        owner: AgentId,
    },
    PopulationGrew {
        tick: u64,
        settlement: SettlementId,
        population: u32,
    },
    PopulationStarved {
        tick: u64,
        settlement: SettlementId,
        population: u32,
    },
    SnapshotSaved {
        tick: u64,
    },
    RunFinished {
        ticks: u64,
        score: f64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementSummary {
    pub id: SettlementId,
    pub anchor: Position,
    pub population: u32,
    pub food: f64,
    pub wood: f64,
    pub stone: f64,
}

impl From<&Settlement> for SettlementSummary {
    fn from(s: &Settlement) -> Self {
        Self {
            id: s.id,
            anchor: s.anchor,
            population: s.population,
            food: s.stockpile.food,
            wood: s.stockpile.wood,
            stone: s.stockpile.stone,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    pub tick: u64,
    pub world: WorldSummary,
    pub total_population: u64,
    pub settlements: Vec<SettlementSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Snapshot {
    Snapshot(SnapshotRecord),
}

pub trait RunLogger {
    fn event(&mut self, record: &Event) -> Result<()>;
    fn snapshot(&mut self, record: &Snapshot) -> Result<()>;
}

/// JSON Lines files, flushed after every record.
pub struct JsonlRunLogger {
    events: BufWriter<File>,
    snapshots: BufWriter<File>,
    written: u64,
}

impl JsonlRunLogger {
    pub fn create(events_path: &Path, snapshots_path: &Path) -> Result<Self> {
        Ok(Self {
            events: BufWriter::new(open_append(events_path)?),
            snapshots: BufWriter::new(open_append(snapshots_path)?),
            written: 0,
        })
    }

    pub fn records_written(&self) -> u64 {
        self.written
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn write_line(writer: &mut BufWriter<File>, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

impl RunLogger for JsonlRunLogger {
    fn event(&mut self, record: &Event) -> Result<()> {
        write_line(&mut self.events, record)?;
        self.written += 1;
        Ok(())
    }

    fn snapshot(&mut self, record: &Snapshot) -> Result<()> {
        write_line(&mut self.snapshots, record)?;
        self.written += 1;
        Ok(())
    }
}

/// Keeps serialized lines in memory.
#[derive(Debug, Default)]
pub struct MemoryRunLogger {
    pub events: Vec<String>,
    pub snapshots: Vec<String>,
}

impl MemoryRunLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunLogger for MemoryRunLogger {
    fn event(&mut self, record: &Event) -> Result<()> {
        self.events.push(serde_json::to_string(record)?);
        Ok(())
    }

    fn snapshot(&mut self, record: &Snapshot) -> Result<()> {
        self.snapshots.push(serde_json::to_string(record)?);
        Ok(())
    }
}

/// Discards everything. Used for search evaluations that keep no artifacts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRunLogger;

impl RunLogger for NullRunLogger {
    fn event(&mut self, _record: &Event) -> Result<()> {
        Ok(())
    }

    fn snapshot(&mut self, _record: &Snapshot) -> Result<()> {
        Ok(())
    }
}

pub trait RunIdSource: Sync {
    fn next_run_id(&self) -> String;
}

/// `YYYYMMDD_HHMMSS_xxxxxx`, UTC, with a random lowercase/digit suffix.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampRunIds;

const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

impl RunIdSource for TimestampRunIds {
    fn next_run_id(&self) -> String {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| SUFFIX_CHARS[rng.gen_range(0..SUFFIX_CHARS.len())] as char)
            .collect();
        format!("{stamp}_{suffix}")
    }
}

/// `<prefix>_0000`, `<prefix>_0001`, ...
#[derive(Debug)]
pub struct SequentialRunIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialRunIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl RunIdSource for SequentialRunIds {
    fn next_run_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}_{n:04}", self.prefix)
    }
}
