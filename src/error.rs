//! Error taxonomy for the evolution loop.
//!
//! Parse and validation failures are recoverable: the caller resubmits and the
//! session is untouched. Oracle failures abort the current call and are never
//! scored as zero.

use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = EvolverError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EvolverError {
    #[error("unknown problem '{0}'")]
    UnknownProblem(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("no structured patch found in response: {0}")]
    PatchParse(String),

    #[error("scoring oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("session '{state_id}' already ran {iteration} iterations")]
    SessionFinished { state_id: String, iteration: u32 },

    #[error("session '{state_id}' changed underneath this step (expected iteration {expected}, found {found})")]
    ConcurrentModification {
        state_id: String,
        expected: u32,
        found: u32,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EvolverError {
    /// Stable machine-readable name for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            EvolverError::UnknownProblem(_) => "unknown_problem",
            EvolverError::SessionNotFound(_) => "session_not_found",
            EvolverError::PatchParse(_) => "patch_parse_error",
            EvolverError::OracleUnavailable(_) => "oracle_unavailable",
            EvolverError::SessionFinished { .. } => "session_finished",
            EvolverError::ConcurrentModification { .. } => "concurrent_modification",
            EvolverError::Config(_) => "config_error",
            EvolverError::Storage(_) => "storage_error",
        }
    }

    /// What the external driver should do next.
    pub fn hint(&self) -> String {
        match self {
            EvolverError::UnknownProblem(_) => format!(
                "Use one of the registered problems: {}",
                crate::problems::ProblemKind::all()
                    .iter()
                    .map(|p| p.key())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            EvolverError::SessionNotFound(_) => {
                "Start a new session; state ids are only valid for the store that created them".to_string()
            }
            EvolverError::PatchParse(_) => {
                "Respond with a ```json fenced block containing a JSON object of parameter changes. \
                 Session progress was not lost."
                    .to_string()
            }
            EvolverError::OracleUnavailable(_) => {
                "The scoring run failed or timed out; the session was not modified. Retry the same call."
                    .to_string()
            }
            EvolverError::SessionFinished { .. } => {
                "This session reached its iteration cap. Start a new session or raise max_iterations.".to_string()
            }
            EvolverError::ConcurrentModification { .. } => {
                "Another step on this session finished first. Reload and retry.".to_string()
            }
            EvolverError::Config(_) => "Check evolver.toml and EVOLVER_* environment variables".to_string(),
            EvolverError::Storage(_) => {
                "Internal storage or I/O failure; see the error for the path or record involved".to_string()
            }
        }
    }

    /// Whether resubmitting against the same session can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EvolverError::PatchParse(_)
                | EvolverError::OracleUnavailable(_)
                | EvolverError::ConcurrentModification { .. }
        )
    }
}

/// Structured error payload returned at the call boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    pub hint: String,
}

impl From<&EvolverError> for ErrorResponse {
    fn from(err: &EvolverError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind(),
            hint: err.hint(),
        }
    }
}
