//! Durable session state.
//!
//! One record per session, keyed by `state_id`. The output location given at
//! start lives beside the record, not inside it.
//!
//! `replace` is a compare-and-swap on the stored iteration: a step that lost
//! a race gets `ConcurrentModification` instead of silently overwriting the
//! winner.

mod memory;
mod redb_store;

pub use memory::MemorySessionStore;
pub use redb_store::RedbSessionStore;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{HistoryEntry, ParameterSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub state_id: String,
    pub problem: String,
    pub iteration: u32,
    pub best_score: f64,
    pub best_params: ParameterSet,
    pub history: Vec<HistoryEntry>,
}

impl Session {
    /// A fresh session: iteration 0 with the initial evaluation as history.
    pub fn new(problem: impl Into<String>, params: ParameterSet, score: f64) -> Self {
        Self {
            state_id: uuid::Uuid::new_v4().to_string(),
            problem: problem.into(),
            iteration: 0,
            best_score: score,
            best_params: params,
            history: vec![HistoryEntry { iteration: 0, score }],
        }
    }

    pub fn phase(&self, max_iterations: u32) -> SessionPhase {
        if self.iteration >= max_iterations {
            SessionPhase::Done
        } else {
            SessionPhase::Active
        }
    }
}

/// Lifecycle position. A session absent from the store is `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    New,
    Active,
    Done,
}

pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Insert a new session. Fails if the id already exists.
    fn create(&self, session: &Session, output_location: &str) -> Result<()>;

    fn load(&self, state_id: &str) -> Result<Option<Session>>;

    /// Overwrite `session` only if the stored iteration is still `expected_iteration`.
    fn replace(&self, session: &Session, expected_iteration: u32) -> Result<()>;

    fn output_location(&self, state_id: &str) -> Result<Option<String>>;

    fn list_ids(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every store must share.

    use serde_json::json;

    use super::*;
    use crate::error::EvolverError;

    fn session() -> Session {
        Session::new("world_gen", ParameterSet::new(json!({"a": 1})), 0.5)
    }

    pub fn round_trip(store: &dyn SessionStore) {
        let s = session();
        store.create(&s, "/tmp/out").unwrap();
        assert_eq!(store.load(&s.state_id).unwrap(), Some(s.clone()));
        assert_eq!(store.output_location(&s.state_id).unwrap().as_deref(), Some("/tmp/out"));
        assert!(store.list_ids().unwrap().contains(&s.state_id));
        assert_eq!(store.load("missing").unwrap(), None);
        assert_eq!(store.output_location("missing").unwrap(), None);
    }

    pub fn duplicate_create_fails(store: &dyn SessionStore) {
        let s = session();
        store.create(&s, "/tmp/out").unwrap();
        assert!(store.create(&s, "/tmp/other").is_err());
        assert_eq!(store.output_location(&s.state_id).unwrap().as_deref(), Some("/tmp/out"));
    }

    pub fn compare_and_swap(store: &dyn SessionStore) {
        let s = session();
        store.create(&s, "/tmp/out").unwrap();

        let mut next = s.clone();
        next.iteration = 1;
        next.history.push(HistoryEntry { iteration: 1, score: 0.7 });
        store.replace(&next, 0).unwrap();

        // A second writer that loaded iteration 0 loses.
        let mut stale = s.clone();
        stale.iteration = 1;
        let err = store.replace(&stale, 0).unwrap_err();
        assert!(matches!(
            err,
            EvolverError::ConcurrentModification { expected: 0, found: 1, .. }
        ));
        assert_eq!(store.load(&s.state_id).unwrap(), Some(next));

        let mut ghost = session();
        ghost.iteration = 1;
        assert!(matches!(store.replace(&ghost, 0), Err(EvolverError::SessionNotFound(_))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_session_shape() {
        let s = Session::new("crop_economy", ParameterSet::new(json!({})), 0.4);
        assert_eq!(s.iteration, 0);
        assert_eq!(s.history, vec![HistoryEntry { iteration: 0, score: 0.4 }]);
        assert_eq!(s.state_id.len(), 36);
        assert_eq!(s.phase(10), SessionPhase::Active);
        assert_eq!(s.phase(0), SessionPhase::Done);
    }
}
