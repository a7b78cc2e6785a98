//! StateStore — redb-backed persistence for scaling-event state.
//!
//! Records are JSON-serialized into redb's `&[u8]` value column, keyed by
//! their state path. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::SCALING_STATE;
use crate::types::ScalingState;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create the table if it doesn't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SCALING_STATE).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Populate `state` from the record at its `state_path`.
    ///
    /// When no record exists and `create_if_missing` is set, the incoming
    /// (default-initialized) record is persisted as-is so subsequent reads
    /// find it. Otherwise a missing record is `StateError::NotFound`.
    pub fn read_state(&self, state: &mut ScalingState, create_if_missing: bool) -> StateResult<()> {
        let key = state.state_path.clone();
        let found = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SCALING_STATE).map_err(map_err!(Table))?;
            match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let stored: ScalingState =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Codec))?;
                    *state = stored;
                    true
                }
                None => false,
            }
        };

        if !found {
            if !create_if_missing {
                return Err(StateError::NotFound(key));
            }
            debug!(path = %key, "no state record found, initializing");
            self.persist_state(state)?;
        }
        Ok(())
    }

    /// Write a state record at its `state_path`, replacing any existing one.
    pub fn persist_state(&self, state: &ScalingState) -> StateResult<()> {
        let value = serde_json::to_vec(state).map_err(map_err!(Codec))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SCALING_STATE).map_err(map_err!(Table))?;
            table
                .insert(state.state_path.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(path = %state.state_path, "state persisted");
        Ok(())
    }

    /// Delete the record at `path`. Returns true if it existed.
    pub fn delete_state(&self, path: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SCALING_STATE).map_err(map_err!(Table))?;
            existed = table.remove(path).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, existed, "state deleted");
        Ok(existed)
    }
}
