//! Step orchestrator: the hill-climbing loop, one call at a time.
//!
//! ```text
//! start(problem) ──▶ evaluate initial ──▶ persist session ──▶ prompt
//! step(id, text) ──▶ lock id ──▶ load ──▶ patch best ──▶ evaluate
//!                  ──▶ accept if score >= best ──▶ CAS persist ──▶ prompt | final
//! ```
//!
//! Nothing is persisted until a step's evaluation has succeeded, so parse and
//! oracle failures leave the session exactly as it was.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::{DEFAULT_MAX_EXPOSED_FAILURES, DEFAULT_MAX_ITERATIONS, EvolverConfig};
use crate::error::{EvolverError, Result};
use crate::problems::{ProblemInfo, Registry};
use crate::store::{RedbSessionStore, Session, SessionPhase, SessionStore};
use crate::types::{FailureRecord, HistoryEntry, ParameterSet};

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub state_id: String,
    pub prompt: String,
    pub score: f64,
    pub is_viable: bool,
    pub failures: Vec<FailureRecord>,
    pub iteration: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResponse {
    pub state_id: String,
    pub prompt: String,
    /// Score of this step's candidate
    pub score: f64,
    pub best_score: f64,
    /// Whether this step's candidate is viable
    pub is_viable: bool,
    pub failures: Vec<FailureRecord>,
    pub iteration: u32,
    /// Whether the candidate replaced the best parameters
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalResponse {
    pub done: bool,
    pub state_id: String,
    pub final_score: f64,
    pub best_params: ParameterSet,
    pub history: Vec<HistoryEntry>,
    pub iterations_run: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StepOutcome {
    Continue(StepResponse),
    Done(FinalResponse),
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done(_))
    }
}

pub struct Evolver {
    registry: Registry,
    store: Arc<dyn SessionStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_exposed_failures: usize,
    default_max_iterations: u32,
}

impl Evolver {
    pub fn new(registry: Registry, store: Arc<dyn SessionStore>) -> Self {
        Self {
            registry,
            store,
            locks: DashMap::new(),
            max_exposed_failures: DEFAULT_MAX_EXPOSED_FAILURES,
            default_max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Oracle, redb store and limits as described by `config`.
    pub fn from_config(config: &EvolverConfig) -> Result<Self> {
        let registry = Registry::new(config.oracle()?);
        let store = RedbSessionStore::open(&config.state_dir)?;
        Ok(Self::new(registry, Arc::new(store)).with_limits(config.max_exposed_failures, config.default_max_iterations))
    }

    pub fn with_limits(mut self, max_exposed_failures: usize, default_max_iterations: u32) -> Self {
        self.max_exposed_failures = max_exposed_failures;
        self.default_max_iterations = default_max_iterations;
        self
    }

    pub fn default_max_iterations(&self) -> u32 {
        self.default_max_iterations
    }

    pub fn problems(&self) -> Vec<ProblemInfo> {
        self.registry.problems()
    }

    /// Begin a session for `problem_id`. Nothing is persisted if the initial
    /// evaluation fails.
    pub fn start(&self, problem_id: &str, output_location: &str) -> Result<StartResponse> {
        let entry = self.registry.lookup(problem_id)?;
        let params = entry.initial_params();
        let eval = entry.evaluate(&params)?;

        let session = Session::new(entry.kind.key(), params, eval.score);
        self.store.create(&session, output_location)?;

        tracing::info!(
            state_id = %session.state_id,
            problem = %entry.kind,
            score = eval.score,
            viable = eval.is_viable,
            "session started"
        );

        let failures = eval.top_failures(self.max_exposed_failures);
        Ok(StartResponse {
            prompt: entry.render_prompt(&session.best_params, &failures),
            state_id: session.state_id,
            score: eval.score,
            is_viable: eval.is_viable,
            failures,
            iteration: 0,
        })
    }

    /// Apply one external response to the session's best parameters.
    pub fn step(&self, state_id: &str, response: &str, max_iterations: Option<u32>) -> Result<StepOutcome> {
        let max_iterations = max_iterations.unwrap_or(self.default_max_iterations);
        let lock = self.lock_for(state_id);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.step_locked(state_id, response, max_iterations)
        };
        drop(lock);
        // Last holder out removes the entry, so the table only holds ids with a step in flight.
        self.locks.remove_if(state_id, |_, l| Arc::strong_count(l) == 1);
        outcome
    }

    fn step_locked(&self, state_id: &str, response: &str, max_iterations: u32) -> Result<StepOutcome> {
        let mut session = self
            .store
            .load(state_id)?
            .ok_or_else(|| EvolverError::SessionNotFound(state_id.to_string()))?;
        if session.phase(max_iterations) == SessionPhase::Done {
            return Err(EvolverError::SessionFinished {
                state_id: state_id.to_string(),
                iteration: session.iteration,
            });
        }

        let entry = self.registry.lookup(&session.problem)?;
        let candidate = entry.apply_patch(&session.best_params, response).inspect_err(|e| {
            tracing::warn!(state_id, error = %e, "rejected response");
        })?;
        let eval = entry.evaluate(&candidate)?;

        let loaded_iteration = session.iteration;
        let accepted = eval.score >= session.best_score;
        if accepted {
            session.best_score = eval.score;
            session.best_params = candidate;
        }
        session.iteration += 1;
        session.history.push(HistoryEntry {
            iteration: session.iteration,
            score: eval.score,
        });
        self.store.replace(&session, loaded_iteration)?;

        tracing::info!(
            state_id,
            iteration = session.iteration,
            score = eval.score,
            best_score = session.best_score,
            accepted,
            "step"
        );

        if session.phase(max_iterations) == SessionPhase::Done {
            let result = FinalResponse {
                done: true,
                final_score: session.best_score,
                iterations_run: session.iteration,
                state_id: session.state_id,
                best_params: session.best_params,
                history: session.history,
            };
            self.write_artifacts(&result);
            return Ok(StepOutcome::Done(result));
        }

        let failures = eval.top_failures(self.max_exposed_failures);
        Ok(StepOutcome::Continue(StepResponse {
            prompt: entry.render_prompt(&session.best_params, &failures),
            state_id: session.state_id,
            score: eval.score,
            best_score: session.best_score,
            is_viable: eval.is_viable,
            failures,
            iteration: session.iteration,
            accepted,
        }))
    }

    /// The persisted session, for inspection.
    pub fn show(&self, state_id: &str) -> Result<Session> {
        self.store
            .load(state_id)?
            .ok_or_else(|| EvolverError::SessionNotFound(state_id.to_string()))
    }

    pub fn list_sessions(&self) -> Result<Vec<String>> {
        self.store.list_ids()
    }

    fn lock_for(&self, state_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(state_id.to_string()).or_default().clone()
    }

    /// Best-effort: a failed write is logged, never surfaced.
    fn write_artifacts(&self, result: &FinalResponse) {
        let location = match self.store.output_location(&result.state_id) {
            Ok(Some(location)) => location,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(state_id = %result.state_id, error = %e, "no output location");
                return;
            }
        };
        match write_result(Path::new(&location), result) {
            Ok(path) => tracing::info!(state_id = %result.state_id, path = %path.display(), "wrote run artifacts"),
            Err(e) => tracing::warn!(state_id = %result.state_id, error = ?e, "failed to write run artifacts"),
        }
    }
}

fn write_result(location: &Path, result: &FinalResponse) -> anyhow::Result<PathBuf> {
    let dir = location.join(&result.state_id);
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join("result.json");
    let json = serde_json::to_string_pretty(result).context("Failed to serialize result")?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::oracle::testing::{FieldScore, Scripted};
    use crate::oracle::{ScoringOracle, Simulator};
    use crate::problems::{Problem, WorldGen};
    use crate::store::MemorySessionStore;
    use tempfile::TempDir;

    fn evolver_with(sim: impl Simulator + 'static) -> Evolver {
        let oracle = ScoringOracle::new(Arc::new(sim), Duration::from_secs(10));
        Evolver::new(Registry::new(oracle), Arc::new(MemorySessionStore::new()))
    }

    fn tree_scored() -> Evolver {
        evolver_with(FieldScore("tree_frequency"))
    }

    fn propose(tree: f64) -> String {
        format!("Trying this:\n```json\n{{\"tree_frequency\": {}}}\n```", tree)
    }

    fn unwrap_continue(outcome: StepOutcome) -> StepResponse {
        match outcome {
            StepOutcome::Continue(r) => r,
            StepOutcome::Done(_) => panic!("unexpected terminal response"),
        }
    }

    #[test]
    fn test_start_evaluates_and_persists() {
        let evo = tree_scored();
        let start = evo.start("world_gen", "/tmp/unused").unwrap();
        assert_eq!(start.iteration, 0);
        assert!((start.score - 0.25).abs() < 1e-12);
        assert!(!start.is_viable);
        // five seeds, one failure each, truncated to six
        assert_eq!(start.failures.len(), 5);
        assert!(start.prompt.contains("tree_frequency"));

        let session = evo.show(&start.state_id).unwrap();
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.best_params, WorldGen.initial_params());
    }

    #[test]
    fn test_start_unknown_problem() {
        let err = tree_scored().start("chess", "/tmp").unwrap_err();
        assert_eq!(err.kind(), "unknown_problem");
    }

    #[test]
    fn test_start_oracle_failure_persists_nothing() {
        let evo = evolver_with(Scripted::new([Err(anyhow::anyhow!("down"))]));
        let err = evo.start("world_gen", "/tmp").unwrap_err();
        assert_eq!(err.kind(), "oracle_unavailable");
        assert!(evo.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_best_is_monotonic_and_history_grows() {
        let evo = tree_scored();
        let id = evo.start("world_gen", "/tmp").unwrap().state_id;
        let mut best = 0.25;
        for (i, tree) in [0.3, 0.1, 0.3, 0.05, 0.4].into_iter().enumerate() {
            let r = unwrap_continue(evo.step(&id, &propose(tree), Some(100)).unwrap());
            assert!(r.best_score >= best);
            best = r.best_score;
            assert_eq!(r.iteration, i as u32 + 1);
            assert_eq!(evo.show(&id).unwrap().history.len(), i + 2);
        }
        assert!((best - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_tie_adopts_newer_candidate() {
        let evo = evolver_with(FieldScore("river_count"));
        let id = evo.start("world_gen", "/tmp").unwrap().state_id;
        let r = unwrap_continue(evo.step(&id, r#"{"river_count": 2, "pond_count": 9}"#, None).unwrap());
        assert!(r.accepted);
        assert_eq!(evo.show(&id).unwrap().best_params.get_f64("pond_count"), Some(9.0));
    }

    #[test]
    fn test_unparseable_response_leaves_state_untouched() {
        let evo = tree_scored();
        let id = evo.start("world_gen", "/tmp").unwrap().state_id;
        let before = evo.show(&id).unwrap();
        let err = evo.step(&id, "I think trees should be denser.", None).unwrap_err();
        assert_eq!(err.kind(), "patch_parse_error");
        assert!(err.is_recoverable());
        assert_eq!(evo.show(&id).unwrap(), before);
    }

    #[test]
    fn test_oracle_failure_leaves_state_untouched() {
        let script = (0..5).map(|_| Ok(0.5)).chain([Err(anyhow::anyhow!("simulator crashed"))]);
        let evo = evolver_with(Scripted::new(script));
        let id = evo.start("world_gen", "/tmp").unwrap().state_id;
        let before = evo.show(&id).unwrap();
        let err = evo.step(&id, &propose(0.3), None).unwrap_err();
        assert_eq!(err.kind(), "oracle_unavailable");
        assert_eq!(evo.show(&id).unwrap(), before);
    }

    #[test]
    fn test_unknown_session() {
        let err = tree_scored().step("nope", &propose(0.3), None).unwrap_err();
        assert_eq!(err.kind(), "session_not_found");
    }

    #[test]
    fn test_lock_table_drains_after_steps() {
        let evo = tree_scored();
        for i in 0..1000 {
            let err = evo.step(&format!("bogus-{}", i), "{}", None).unwrap_err();
            assert_eq!(err.kind(), "session_not_found");
        }
        assert_eq!(evo.locks.len(), 0);

        let id = evo.start("world_gen", "/tmp").unwrap().state_id;
        evo.step(&id, &propose(0.3), None).unwrap();
        evo.step(&id, "no json here", None).unwrap_err();
        assert!(evo.locks.is_empty());
    }

    #[test]
    fn test_terminal_exactly_once() {
        let out = TempDir::new().unwrap();
        let evo = tree_scored();
        let id = evo.start("world_gen", out.path().to_str().unwrap()).unwrap().state_id;

        assert!(!evo.step(&id, &propose(0.3), Some(2)).unwrap().is_done());
        let StepOutcome::Done(done) = evo.step(&id, &propose(0.35), Some(2)).unwrap() else {
            panic!("expected terminal response");
        };
        assert!(done.done);
        assert_eq!(done.iterations_run, 2);
        assert_eq!(done.history.len(), 3);
        assert!(WorldGen.schema().check(done.best_params.as_value()).is_empty());

        let err = evo.step(&id, &propose(0.4), Some(2)).unwrap_err();
        assert!(matches!(err, EvolverError::SessionFinished { iteration: 2, .. }));

        let artifact = out.path().join(&id).join("result.json");
        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(artifact).unwrap()).unwrap();
        assert_eq!(written["done"], serde_json::json!(true));
        assert_eq!(written["iterations_run"], serde_json::json!(2));
    }

    #[test]
    fn test_dip_then_climb_keeps_max_step_params() {
        let out = TempDir::new().unwrap();
        let evo = tree_scored();
        let id = evo.start("world_gen", out.path().to_str().unwrap()).unwrap().state_id;

        let r1 = unwrap_continue(evo.step(&id, &propose(0.2), Some(3)).unwrap());
        assert!(!r1.accepted);
        assert!((r1.score - 0.2).abs() < 1e-12);
        let r2 = unwrap_continue(evo.step(&id, &propose(0.55), Some(3)).unwrap());
        assert!(r2.accepted);
        let StepOutcome::Done(done) = evo.step(&id, &propose(0.3), Some(3)).unwrap() else {
            panic!("expected terminal response");
        };

        assert_eq!(done.best_params.get_f64("tree_frequency"), Some(0.55));
        assert!((done.final_score - 0.55).abs() < 1e-12);
        let scores: Vec<f64> = done.history.iter().map(|h| h.score).collect();
        assert_eq!(scores.len(), 4);
        assert!(scores[1] < scores[0] && scores[2] > scores[1] && scores[3] < scores[2]);
    }

    #[test]
    fn test_clamped_patch_is_scored_in_domain() {
        let evo = tree_scored();
        let id = evo.start("world_gen", "/tmp").unwrap().state_id;
        let r = unwrap_continue(evo.step(&id, &propose(5.0), None).unwrap());
        assert!((r.score - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_concurrent_steps_serialize() {
        let evo = tree_scored();
        let id = evo.start("world_gen", "/tmp").unwrap().state_id;
        std::thread::scope(|s| {
            for i in 0..4 {
                let evo = &evo;
                let id = &id;
                s.spawn(move || evo.step(id, &propose(0.3 + i as f64 * 0.05), None).unwrap());
            }
        });
        assert!(evo.locks.is_empty());
        let session = evo.show(&id).unwrap();
        assert_eq!(session.iteration, 4);
        assert_eq!(session.history.len(), 5);
        assert!((session.best_score - 0.45).abs() < 1e-12);
    }
}
