use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{Session, SessionStore};
use crate::error::{EvolverError, Result};

/// Process-local store for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
    outputs: DashMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, session: &Session, output_location: &str) -> Result<()> {
        match self.sessions.entry(session.state_id.clone()) {
            Entry::Occupied(_) => Err(anyhow::anyhow!("session {} already exists", session.state_id).into()),
            Entry::Vacant(slot) => {
                self.outputs.insert(session.state_id.clone(), output_location.to_string());
                slot.insert(session.clone());
                Ok(())
            }
        }
    }

    fn load(&self, state_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(state_id).map(|s| s.clone()))
    }

    fn replace(&self, session: &Session, expected_iteration: u32) -> Result<()> {
        // The shard lock is held for the whole check-and-write.
        let mut stored = self
            .sessions
            .get_mut(&session.state_id)
            .ok_or_else(|| EvolverError::SessionNotFound(session.state_id.clone()))?;
        if stored.iteration != expected_iteration {
            return Err(EvolverError::ConcurrentModification {
                state_id: session.state_id.clone(),
                expected: expected_iteration,
                found: stored.iteration,
            });
        }
        *stored = session.clone();
        Ok(())
    }

    fn output_location(&self, state_id: &str) -> Result<Option<String>> {
        Ok(self.outputs.get(state_id).map(|s| s.clone()))
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.sessions.iter().map(|e| e.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::conformance;
    use super::*;

    #[test]
    fn test_round_trip() {
        conformance::round_trip(&MemorySessionStore::new());
    }

    #[test]
    fn test_duplicate_create_fails() {
        conformance::duplicate_create_fails(&MemorySessionStore::new());
    }

    #[test]
    fn test_compare_and_swap() {
        conformance::compare_and_swap(&MemorySessionStore::new());
    }
}
