//! Persistent session store using redb.
//!
//! Layout:
//! - Database: `<state_dir>/sessions.redb`
//! - `sessions`: state_id -> JSON-serialized [`Session`]
//! - `outputs`: state_id -> output location
//!
//! JSON rather than a binary codec because parameter sets are free-form
//! `serde_json::Value` trees.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use redb::{Database, ReadableTable, TableDefinition};

use super::{Session, SessionStore};
use crate::error::{EvolverError, Result};

const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const OUTPUTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("outputs");

pub struct RedbSessionStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSessionStore").field("path", &self.path).finish()
    }
}

fn to_bytes(session: &Session) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(session).context("Failed to serialize session")
}

fn from_bytes(bytes: &[u8]) -> anyhow::Result<Session> {
    serde_json::from_slice(bytes).context("Failed to deserialize session")
}

impl RedbSessionStore {
    /// Open or create `<state_dir>/sessions.redb`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;

        let path = state_dir.join("sessions.redb");
        let db = Database::create(&path)
            .with_context(|| format!("Failed to open session database: {}", path.display()))?;

        // Read transactions can't open tables that were never created.
        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            write_txn.open_table(SESSIONS_TABLE).context("Failed to open sessions table")?;
            write_txn.open_table(OUTPUTS_TABLE).context("Failed to open outputs table")?;
        }
        write_txn.commit().context("Failed to initialize session database")?;

        tracing::debug!(path = %path.display(), "opened session store");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for RedbSessionStore {
    fn create(&self, session: &Session, output_location: &str) -> Result<()> {
        let bytes = to_bytes(session)?;
        let write_txn = self.db.begin_write().context("Failed to begin write transaction")?;
        {
            let mut sessions = write_txn.open_table(SESSIONS_TABLE).context("Failed to open sessions table")?;
            if sessions.get(session.state_id.as_str()).context("Failed to read session")?.is_some() {
                return Err(anyhow::anyhow!("session {} already exists", session.state_id).into());
            }
            sessions
                .insert(session.state_id.as_str(), bytes.as_slice())
                .with_context(|| format!("Failed to insert session {}", session.state_id))?;

            let mut outputs = write_txn.open_table(OUTPUTS_TABLE).context("Failed to open outputs table")?;
            outputs
                .insert(session.state_id.as_str(), output_location)
                .with_context(|| format!("Failed to record output location for {}", session.state_id))?;
        }
        write_txn.commit().context("Failed to commit new session")?;
        Ok(())
    }

    fn load(&self, state_id: &str) -> Result<Option<Session>> {
        let read_txn = self.db.begin_read().context("Failed to begin read transaction")?;
        let table = read_txn.open_table(SESSIONS_TABLE).context("Failed to open sessions table")?;
        let Some(guard) = table.get(state_id).context("Failed to read session")? else {
            return Ok(None);
        };
        Ok(Some(from_bytes(guard.value())?))
    }

    fn replace(&self, session: &Session, expected_iteration: u32) -> Result<()> {
        let bytes = to_bytes(session)?;
        let write_txn = self.db.begin_write().context("Failed to begin write transaction")?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE).context("Failed to open sessions table")?;
            let stored = match table.get(session.state_id.as_str()).context("Failed to read session")? {
                Some(guard) => from_bytes(guard.value())?,
                None => return Err(EvolverError::SessionNotFound(session.state_id.clone())),
            };
            if stored.iteration != expected_iteration {
                return Err(EvolverError::ConcurrentModification {
                    state_id: session.state_id.clone(),
                    expected: expected_iteration,
                    found: stored.iteration,
                });
            }
            table
                .insert(session.state_id.as_str(), bytes.as_slice())
                .with_context(|| format!("Failed to update session {}", session.state_id))?;
        }
        write_txn.commit().context("Failed to commit session update")?;
        Ok(())
    }

    fn output_location(&self, state_id: &str) -> Result<Option<String>> {
        let read_txn = self.db.begin_read().context("Failed to begin read transaction")?;
        let table = read_txn.open_table(OUTPUTS_TABLE).context("Failed to open outputs table")?;
        let location = table
            .get(state_id)
            .context("Failed to read output location")?
            .map(|guard| guard.value().to_string());
        Ok(location)
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read().context("Failed to begin read transaction")?;
        let table = read_txn.open_table(SESSIONS_TABLE).context("Failed to open sessions table")?;
        let mut ids = Vec::new();
        for entry in table.iter().context("Failed to iterate sessions")? {
            let (key, _) = entry.context("Failed to read session key")?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::super::conformance;
    use super::*;
    use crate::types::ParameterSet;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        conformance::round_trip(&RedbSessionStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_duplicate_create_fails() {
        let dir = TempDir::new().unwrap();
        conformance::duplicate_create_fails(&RedbSessionStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_compare_and_swap() {
        let dir = TempDir::new().unwrap();
        conformance::compare_and_swap(&RedbSessionStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let session = Session::new("crop_economy", ParameterSet::new(json!({"x": [1, 2]})), 0.25);
        {
            let store = RedbSessionStore::open(dir.path()).unwrap();
            store.create(&session, "/tmp/runs").unwrap();
            assert!(store.path().ends_with("sessions.redb"));
        }
        let store = RedbSessionStore::open(dir.path()).unwrap();
        assert_eq!(store.load(&session.state_id).unwrap(), Some(session.clone()));
        assert_eq!(store.list_ids().unwrap(), vec![session.state_id]);
    }
}
