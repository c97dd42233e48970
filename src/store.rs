//! Durable session store backed by redb.
//!
//! One table, keyed by session identifier; values are the JSON-encoded
//! session record `{id, createdAt, elements}`. Commits are ACID, so a
//! record handed to [`BoardStore::put`] is on disk before the call
//! returns. The API is synchronous; async callers hop through
//! `spawn_blocking` via the `*_async` wrappers.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::{now_millis, Element};

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

const STORE_FILE: &str = "sketchboard.redb";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o: {0}")]
    Io(String),
    #[error("storage serialization: {0}")]
    Serialization(String),
}

/// The persisted shape of one session. Subscribers and cursors are
/// runtime-only and never land here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
    pub elements: Vec<Element>,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: now_millis(),
            elements: Vec::new(),
        }
    }
}

/// Durable storage handle. Clone is cheap (Arc) and every clone shares the
/// same database.
#[derive(Clone)]
pub struct BoardStore {
    db: Arc<Database>,
}

impl BoardStore {
    /// Open (or create) the store inside `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;
        let db = Database::create(data_dir.as_ref().join(STORE_FILE))
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let _ = txn
                .open_table(SESSIONS)
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Write the full session record. Overwrites any prior value; durable
    /// once this returns.
    pub fn put(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn
                .open_table(SESSIONS)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            table
                .insert(record.id.as_str(), bytes.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn
            .open_table(SESSIONS)
            .map_err(|e| StoreError::Io(e.to_string()))?;

        match table.get(id).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(value) => {
                let record: SessionRecord = serde_json::from_slice(value.value())
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Every persisted session identifier, in key order.
    pub fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn
            .open_table(SESSIONS)
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let mut ids = Vec::new();
        for entry in table.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (key, _) = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            ids.push(key.value().to_owned());
        }
        Ok(ids)
    }

    pub async fn put_async(&self, record: SessionRecord) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.put(&record))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
    }

    pub async fn get_async(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let store = self.clone();
        let id = id.to_owned();
        tokio::task::spawn_blocking(move || store.get(&id))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
    }

    pub async fn session_ids_async(&self) -> Result<Vec<String>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.session_ids())
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
    }
}
