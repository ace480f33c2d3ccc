//! Problem registry.
//!
//! A problem bundles an initial parameter set, a schema, an evaluation plan
//! and a prompt brief. The set is closed: [`ProblemKind`] enumerates every
//! registered problem and the orchestrator only ever talks to the
//! [`Problem`] trait.

pub mod crop_economy;
pub mod noise;
pub mod world_gen;

pub use crop_economy::CropEconomy;
pub use world_gen::WorldGen;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{EvolverError, Result};
use crate::oracle::{EvalPlan, ScoringOracle};
use crate::patch::{self, Schema};
use crate::prompt::{self, PromptBrief};
use crate::types::{EvalResult, FailureRecord, ParameterSet};

/// A tunable problem.
pub trait Problem: Send + Sync {
    fn kind(&self) -> ProblemKind;
    fn schema(&self) -> &Schema;
    fn plan(&self) -> EvalPlan;
    fn brief(&self) -> &PromptBrief;
    fn initial_params(&self) -> ParameterSet;

    fn summary(&self) -> &'static str {
        self.brief().title
    }

    fn evaluate(&self, oracle: &ScoringOracle, params: &ParameterSet) -> Result<EvalResult> {
        oracle.evaluate(params, &self.plan())
    }

    fn render_prompt(&self, params: &ParameterSet, failures: &[FailureRecord]) -> String {
        prompt::render(self.brief(), self.schema(), params, failures)
    }

    fn apply_patch(&self, base: &ParameterSet, raw: &str) -> Result<ParameterSet> {
        patch::apply(self.schema(), base, raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    WorldGen,
    CropEconomy,
}

impl ProblemKind {
    pub fn all() -> &'static [ProblemKind] {
        &[ProblemKind::WorldGen, ProblemKind::CropEconomy]
    }

    pub fn key(self) -> &'static str {
        match self {
            ProblemKind::WorldGen => "world_gen",
            ProblemKind::CropEconomy => "crop_economy",
        }
    }

    pub fn problem(self) -> &'static dyn Problem {
        match self {
            ProblemKind::WorldGen => &WorldGen,
            ProblemKind::CropEconomy => &CropEconomy,
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ProblemKind {
    type Err = EvolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "world_gen" | "worldgen" | "world" => Ok(ProblemKind::WorldGen),
            "crop_economy" | "economy" | "crops" => Ok(ProblemKind::CropEconomy),
            _ => Err(EvolverError::UnknownProblem(s.to_string())),
        }
    }
}

/// A resolved problem bound to the oracle that scores it.
#[derive(Clone, Copy)]
pub struct ProblemEntry<'a> {
    pub kind: ProblemKind,
    problem: &'static dyn Problem,
    oracle: &'a ScoringOracle,
}

impl ProblemEntry<'_> {
    pub fn initial_params(&self) -> ParameterSet {
        self.problem.initial_params()
    }

    pub fn evaluate(&self, params: &ParameterSet) -> Result<EvalResult> {
        self.problem.evaluate(self.oracle, params)
    }

    pub fn render_prompt(&self, params: &ParameterSet, failures: &[FailureRecord]) -> String {
        self.problem.render_prompt(params, failures)
    }

    pub fn apply_patch(&self, base: &ParameterSet, raw: &str) -> Result<ParameterSet> {
        self.problem.apply_patch(base, raw)
    }

    pub fn schema(&self) -> &'static Schema {
        self.problem.schema()
    }
}

/// Listing row for `list_problems`.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemInfo {
    pub id: &'static str,
    pub title: &'static str,
    pub seeds: usize,
    pub viability_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct Registry {
    oracle: ScoringOracle,
}

impl Registry {
    pub fn new(oracle: ScoringOracle) -> Self {
        Self { oracle }
    }

    pub fn oracle(&self) -> &ScoringOracle {
        &self.oracle
    }

    pub fn lookup(&self, problem_id: &str) -> Result<ProblemEntry<'_>> {
        let kind: ProblemKind = problem_id.parse()?;
        Ok(ProblemEntry {
            kind,
            problem: kind.problem(),
            oracle: &self.oracle,
        })
    }

    pub fn problems(&self) -> Vec<ProblemInfo> {
        ProblemKind::all()
            .iter()
            .map(|&kind| {
                let problem = kind.problem();
                let plan = problem.plan();
                ProblemInfo {
                    id: kind.key(),
                    title: problem.summary(),
                    seeds: plan.seeds.len(),
                    viability_threshold: plan.viability_threshold,
                }
            })
            .collect()
    }
}
