//! StateStore — redb-backed state persistence for meetgrid.
//!
//! This module owns the database handle and table bootstrap. The typed
//! operations live next to the concern they serve:
//! [`registry`](crate::registry), [`assignments`](crate::assignments) and
//! [`fencing`](crate::fencing). All record values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::Database;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StateResult;
use crate::tables::*;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    pub(crate) db: Arc<Database>,
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

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKERS).map_err(map_err!(Table))?;
        txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        txn.open_table(GENERATIONS).map_err(map_err!(Table))?;
        txn.open_table(FENCED_VALUES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn test_worker(id: &str) -> WorkerRecord {
        WorkerRecord {
            id: id.to_string(),
            kind: WorkerKind::MeetingController,
            region: "us-east".to_string(),
            zone: "us-east-1a".to_string(),
            endpoint: "10.0.0.1:7000".to_string(),
            media_endpoint: None,
            max_capacity: 100,
            current_load: 0,
            health_status: HealthStatus::Pending,
            resource_usage: None,
            last_heartbeat_at: 1000,
            registered_at: 1000,
        }
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meetgrid.redb");

        {
            let store = StateStore::open(&path).unwrap();
            store.register_worker(test_worker("mc-1")).unwrap();
            assert_eq!(store.advance_generation("m-1").unwrap(), 1);
        }

        let store = StateStore::open(&path).unwrap();
        let worker = store.get_worker("mc-1").unwrap().unwrap();
        assert_eq!(worker.endpoint, "10.0.0.1:7000");
        assert_eq!(store.current_generation("m-1").unwrap(), 1);
        assert_eq!(store.advance_generation("m-1").unwrap(), 2);
    }

    #[test]
    fn clones_share_the_same_database() {
        let store = StateStore::open_in_memory().unwrap();
        let clone = store.clone();
        store.register_worker(test_worker("mc-1")).unwrap();
        assert!(clone.get_worker("mc-1").unwrap().is_some());
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        // After 2020-01-01.
        assert!(epoch_secs() > 1_577_836_800);
    }
}
