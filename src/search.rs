//! (1+λ) evolutionary search over utility-policy weights.
//!
//! Every generation re-evaluates the incumbent alongside `population - 1`
//! mutants. Evaluation may run in parallel; selection and persistence are
//! serial, so the recorded best score never decreases.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{
    engine::{record_run, EngineBuilder, EngineSettings},
    error::PolicyFileError,
    policy::{UtilityPolicy, Weights},
    runlog::{NullRunLogger, RunIdSource},
    scenario::Scenario,
};

pub const POLICY_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyMeta {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pop: Option<u32>,
}

impl Default for PolicyMeta {
    fn default() -> Self {
        Self {
            version: POLICY_FILE_VERSION,
            seed: None,
            ticks: None,
            gens: None,
            pop: None,
        }
    }
}

/// The persisted best weight vector and the score that earned it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolicyFile {
    pub best_score: Option<f64>,
    pub weights: BTreeMap<String, f64>,
    pub meta: PolicyMeta,
}

#[derive(Deserialize)]
struct RawPolicyFile {
    #[serde(default)]
    best_score: Option<f64>,
    #[serde(default)]
    weights: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    meta: PolicyMeta,
}

impl PolicyFile {
    /// A missing file is an empty policy.
    pub fn load(path: &Path) -> Result<Self, PolicyFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| PolicyFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, PolicyFileError> {
        let raw: RawPolicyFile = serde_json::from_str(text)?;
        let mut weights = BTreeMap::new();
        for (name, value) in raw.weights {
            match value.as_f64() {
                Some(number) => {
                    weights.insert(name, number);
                }
                None => warn!(weight = %name, %value, "ignoring non-numeric policy weight"),
            }
        }
        Ok(Self {
            best_score: raw.best_score,
            weights,
            meta: raw.meta,
        })
    }

    /// Writes to a temporary file beside `path`, then renames it over `path`.
    pub fn save(&self, path: &Path) -> Result<(), PolicyFileError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_error = |source: std::io::Error| PolicyFileError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&dir).map_err(io_error)?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_error)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n").map_err(io_error)?;
        tmp.flush().map_err(io_error)?;
        tmp.persist(path)?;
        Ok(())
    }
}

/// Scores one candidate weight vector.
pub trait Evaluator: Sync {
    fn evaluate(&self, weights: &Weights) -> Result<f64>;

    /// Ticks simulated per evaluation, when the evaluator runs a simulation.
    fn ticks(&self) -> Option<u64> {
        None
    }
}

impl<F> Evaluator for F
where
    F: Fn(&Weights) -> Result<f64> + Sync,
{
    fn evaluate(&self, weights: &Weights) -> Result<f64> {
        self(weights)
    }
}

struct Recorder {
    runs_dir: PathBuf,
    ids: Box<dyn RunIdSource>,
}

/// Runs one full simulation per candidate under a fixed scenario.
pub struct SimulationEvaluator {
    scenario: Scenario,
    recorder: Option<Recorder>,
}

impl SimulationEvaluator {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            recorder: None,
        }
    }

    /// Keep a full run directory for every evaluation.
    pub fn recording(
        mut self,
        runs_dir: impl Into<PathBuf>,
        ids: impl RunIdSource + 'static,
    ) -> Self {
        self.recorder = Some(Recorder {
            runs_dir: runs_dir.into(),
            ids: Box::new(ids),
        });
        self
    }
}

impl Evaluator for SimulationEvaluator {
    fn evaluate(&self, weights: &Weights) -> Result<f64> {
        let policy = Box::new(UtilityPolicy::new(weights.clone()));
        match &self.recorder {
            Some(recorder) => {
                let run_id = recorder.ids.next_run_id();
                let run = record_run(&self.scenario, policy, &run_id, &recorder.runs_dir)?;
                Ok(run.report.score)
            }
            None => {
                let settings = EngineSettings {
                    run_id: "evaluation".into(),
                    scenario: self.scenario.clone(),
                };
                let mut engine = EngineBuilder::standard(settings, policy).build()?;
                Ok(engine.run(&mut NullRunLogger)?.score)
            }
        }
    }

    fn ticks(&self) -> Option<u64> {
        Some(self.scenario.ticks)
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub generations: u32,
    pub population: u32,
    pub sigma: f64,
    /// Seeds the mutation stream. Recorded in the policy file.
    pub seed: u64,
    pub parallel: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            generations: 10,
            population: 8,
            sigma: 0.35,
            seed: 123,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub generation: u32,
    pub scores: Vec<f64>,
    pub top_score: f64,
    pub best_score: Option<f64>,
    pub improved: bool,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best_score: Option<f64>,
    pub best_weights: Weights,
    pub generations: Vec<GenerationReport>,
}

/// Additive uniform noise in `[-sigma, sigma]` on every weight; epsilon is
/// clamped back into range afterwards.
pub fn mutate(weights: &Weights, sigma: f64, rng: &mut impl Rng) -> Weights {
    let mut next = weights.clone();
    if sigma > 0.0 {
        for value in next.values_mut() {
            *value += rng.gen_range(-sigma..=sigma);
        }
    }
    clamp_epsilon(&mut next);
    next
}

pub fn clamp_epsilon(weights: &mut Weights) {
    let epsilon = weights.epsilon();
    weights.set("epsilon", epsilon);
}

/// First index holding the strictly greatest score.
fn select(scores: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (index, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((index, score)),
        }
    }
    best
}

pub struct EvolutionarySearch<E> {
    settings: SearchSettings,
    evaluator: E,
    policy_path: PathBuf,
}

impl<E: Evaluator> EvolutionarySearch<E> {
    pub fn new(settings: SearchSettings, evaluator: E, policy_path: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            evaluator,
            policy_path: policy_path.into(),
        }
    }

    pub fn run(&self) -> Result<SearchOutcome> {
        let settings = &self.settings;
        ensure!(
            settings.sigma.is_finite() && settings.sigma >= 0.0,
            "sigma must be a non-negative number, got {}",
            settings.sigma
        );
        let population = settings.population.max(1) as usize;

        let stored = PolicyFile::load(&self.policy_path)?;
        let mut best = stored.best_score.filter(|score| score.is_finite());
        let mut incumbent = Weights::from_map(stored.weights).with_defaults();
        clamp_epsilon(&mut incumbent);
        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
        let mut reports = Vec::with_capacity(settings.generations as usize);

        info!(
            generations = settings.generations,
            population,
            sigma = settings.sigma,
            best = ?best,
            path = %self.policy_path.display(),
            "search started"
        );

        for generation in 0..settings.generations {
            let mut candidates = Vec::with_capacity(population);
            candidates.push(incumbent.clone());
            while candidates.len() < population {
                candidates.push(mutate(&incumbent, settings.sigma, &mut rng));
            }

            let scores = self.evaluate_all(&candidates);
            let Some((top, top_score)) = select(&scores) else {
                continue;
            };
            let improved = top_score.is_finite() && best.map_or(true, |b| top_score > b);
            if improved {
                best = Some(top_score);
                incumbent = candidates[top].clone();
                let file = PolicyFile {
                    best_score: best,
                    weights: incumbent.as_map().clone(),
                    meta: PolicyMeta {
                        version: POLICY_FILE_VERSION,
                        seed: Some(settings.seed),
                        ticks: self.evaluator.ticks(),
                        gens: Some(settings.generations),
                        pop: Some(population as u32),
                    },
                };
                file.save(&self.policy_path)?;
            }
            info!(generation, top_score, best = ?best, improved, "generation complete");
            reports.push(GenerationReport {
                generation,
                scores,
                top_score,
                best_score: best,
                improved,
            });
        }

        Ok(SearchOutcome {
            best_score: best,
            best_weights: incumbent,
            generations: reports,
        })
    }

    fn evaluate_all(&self, candidates: &[Weights]) -> Vec<f64> {
        if self.settings.parallel {
            candidates
                .par_iter()
                .enumerate()
                .map(|(index, weights)| self.score_candidate(index, weights))
                .collect()
        } else {
            candidates
                .iter()
                .enumerate()
                .map(|(index, weights)| self.score_candidate(index, weights))
                .collect()
        }
    }

    /// Errors, panics and NaN all score negative infinity.
    fn score_candidate(&self, index: usize, weights: &Weights) -> f64 {
        match panic::catch_unwind(AssertUnwindSafe(|| self.evaluator.evaluate(weights))) {
            Ok(Ok(score)) if !score.is_nan() => score,
            Ok(Ok(_)) => {
                warn!(candidate = index, "evaluation produced NaN");
                f64::NEG_INFINITY
            }
            Ok(Err(err)) => {
                warn!(candidate = index, error = %format!("{err:#}"), "evaluation failed");
                f64::NEG_INFINITY
            }
            Err(_) => {
                warn!(candidate = index, "evaluation panicked");
                f64::NEG_INFINITY
            }
        }
    }
}
