//! Scoring oracle: aggregates a simulator over a problem's evaluation conditions.
//!
//! The simulator is the narrow boundary to whatever computes fitness. It sees
//! one fully-resolved parameter set, one condition (a seed) and a mode
//! selector, and returns a [`Trial`]. The oracle runs it once per seed,
//! averages the scores and concatenates every failure before anything is
//! truncated for display.
//!
//! ## Backends
//!
//! | Simulator            | Where it runs                                 |
//! |----------------------|-----------------------------------------------|
//! | [`NativeSimulator`]  | in-process world-gen and crop-economy models  |
//! | [`ProcessSimulator`] | external command, JSON over stdin/stdout      |
//!
//! One deadline covers the whole evaluation. Any simulator error, a
//! non-finite score, or a blown deadline is `OracleUnavailable`.

mod native;
mod process;

pub use native::NativeSimulator;
pub use process::ProcessSimulator;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EvolverError, Result};
use crate::types::{EvalResult, ParameterSet, Trial};

/// Which model the simulator should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    WorldGen,
    CropEconomy,
}

impl SimMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SimMode::WorldGen => "world_gen",
            SimMode::CropEconomy => "crop_economy",
        }
    }
}

impl fmt::Display for SimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "world_gen" => Ok(SimMode::WorldGen),
            "crop_economy" => Ok(SimMode::CropEconomy),
            _ => Err(format!("Unknown simulation mode: {}", s)),
        }
    }
}

/// The fitness computation behind the oracle.
pub trait Simulator: Send + Sync + fmt::Debug {
    /// Run one condition. Implementations that can block must give up at `deadline`.
    fn simulate(
        &self,
        params: &ParameterSet,
        seed: u64,
        mode: SimMode,
        deadline: Instant,
    ) -> anyhow::Result<Trial>;
}

/// How a problem is scored: mode, fixed conditions and viability threshold.
#[derive(Debug, Clone, Copy)]
pub struct EvalPlan {
    pub mode: SimMode,
    pub seeds: &'static [u64],
    pub viability_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct ScoringOracle {
    simulator: Arc<dyn Simulator>,
    timeout: Duration,
}

impl ScoringOracle {
    pub fn new(simulator: Arc<dyn Simulator>, timeout: Duration) -> Self {
        Self { simulator, timeout }
    }

    pub fn native(timeout: Duration) -> Self {
        Self::new(Arc::new(NativeSimulator), timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Score `params` over every condition in `plan`.
    pub fn evaluate(&self, params: &ParameterSet, plan: &EvalPlan) -> Result<EvalResult> {
        if plan.seeds.is_empty() {
            return Err(EvolverError::OracleUnavailable(format!(
                "no evaluation conditions configured for {}",
                plan.mode
            )));
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut total = 0.0;
        let mut failures = Vec::new();

        for &seed in plan.seeds {
            let trial = self
                .simulator
                .simulate(params, seed, plan.mode, deadline)
                .map_err(|e| {
                    tracing::warn!(mode = %plan.mode, seed, error = %e, "simulation failed");
                    EvolverError::OracleUnavailable(format!("{} seed {}: {:#}", plan.mode, seed, e))
                })?;

            if Instant::now() > deadline {
                tracing::warn!(mode = %plan.mode, seed, timeout = ?self.timeout, "evaluation timed out");
                return Err(EvolverError::OracleUnavailable(format!(
                    "{} evaluation exceeded {:?}",
                    plan.mode, self.timeout
                )));
            }
            if !trial.score.is_finite() {
                return Err(EvolverError::OracleUnavailable(format!(
                    "{} seed {} returned non-finite score {}",
                    plan.mode, seed, trial.score
                )));
            }

            tracing::debug!(mode = %plan.mode, seed, score = trial.score, failures = trial.failures.len(), "trial");
            total += trial.score;
            failures.extend(trial.failures);
        }

        let score = total / plan.seeds.len() as f64;
        tracing::debug!(mode = %plan.mode, score, elapsed = ?started.elapsed(), "evaluation complete");

        Ok(EvalResult {
            score,
            is_viable: score > plan.viability_threshold,
            failures,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    const PLAN: EvalPlan = EvalPlan {
        mode: SimMode::WorldGen,
        seeds: &[1, 2, 3],
        viability_threshold: 0.5,
    };

    #[test]
    fn test_scores_are_averaged_and_failures_collected() {
        let oracle = ScoringOracle::new(
            Arc::new(Scripted::new([Ok(0.2), Ok(0.5), Ok(0.8)])),
            Duration::from_secs(5),
        );
        let result = oracle.evaluate(&ParameterSet::new(json!({})), &PLAN).unwrap();
        assert!((result.score - 0.5).abs() < 1e-12);
        assert!(!result.is_viable);

        let oracle = ScoringOracle::new(Arc::new(FieldScore("x")), Duration::from_secs(5));
        let result = oracle.evaluate(&ParameterSet::new(json!({"x": 0.9})), &PLAN).unwrap();
        assert!(result.is_viable);
        assert_eq!(result.failures.len(), 3);
        assert_eq!(result.failures[2].description, "seed 3");
    }

    #[test]
    fn test_simulator_failure_is_unavailable_not_zero() {
        let oracle = ScoringOracle::new(
            Arc::new(Scripted::new([Ok(0.9), Err(anyhow::anyhow!("crashed"))])),
            Duration::from_secs(5),
        );
        let err = oracle.evaluate(&ParameterSet::new(json!({})), &PLAN).unwrap_err();
        assert!(matches!(err, EvolverError::OracleUnavailable(ref m) if m.contains("crashed")));
    }

    #[test]
    fn test_non_finite_score_rejected() {
        let oracle = ScoringOracle::new(
            Arc::new(Scripted::new([Ok(f64::NAN), Ok(1.0), Ok(1.0)])),
            Duration::from_secs(5),
        );
        let err = oracle.evaluate(&ParameterSet::new(json!({})), &PLAN).unwrap_err();
        assert_eq!(err.kind(), "oracle_unavailable");
    }

    #[derive(Debug)]
    struct Sleepy(Duration);

    impl Simulator for Sleepy {
        fn simulate(&self, _: &ParameterSet, _: u64, _: SimMode, _: Instant) -> anyhow::Result<Trial> {
            std::thread::sleep(self.0);
            Ok(Trial { score: 1.0, failures: Vec::new() })
        }
    }

    #[test]
    fn test_slow_simulator_is_unavailable() {
        let oracle = ScoringOracle::new(Arc::new(Sleepy(Duration::from_millis(20))), Duration::from_millis(5));
        let err = oracle.evaluate(&ParameterSet::new(json!({})), &PLAN).unwrap_err();
        assert!(matches!(err, EvolverError::OracleUnavailable(ref m) if m.contains("exceeded")));
    }
}
