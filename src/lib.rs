//! evolver - step-wise parameter evolution for game content
//!
//! An external proposer (usually an LLM) improves a problem's parameters one
//! round at a time. Each round the proposer gets a prompt with the current
//! best parameters and the failures they cause, and answers with a JSON
//! patch. The patch is validated, scored, and kept only if it does at least
//! as well as the best so far.
//!
//! # Architecture
//!
//! ```text
//! Registry → Scoring Oracle → Prompt Builder ─▶ proposer ─▶ Patch Validator → Oracle → accept?
//!    ↓            ↓                ↓                              ↓                      ↓
//! world_gen   native sim      failures +                    extract/merge/         redb session
//! crop_economy or process     schema rules                  clamp to schema        (CAS on iteration)
//! ```
//!
//! Sessions are durable: every call is independent and the full state lives
//! in the session store, so the loop survives restarts of both sides.

pub mod config;
pub mod error;
pub mod mcp;
pub mod oracle;
pub mod orchestrator;
pub mod patch;
pub mod problems;
pub mod prompt;
pub mod store;
pub mod types;

pub use config::EvolverConfig;
pub use error::{ErrorResponse, EvolverError, Result};
pub use oracle::{ScoringOracle, Simulator};
pub use orchestrator::{Evolver, FinalResponse, StartResponse, StepOutcome, StepResponse};
pub use problems::{Problem, ProblemKind, Registry};
pub use types::{EvalResult, FailureRecord, HistoryEntry, ParameterSet, Trial};
