//! Durable sled-backed job status store.
//!
//! Keys are hierarchical job ids (segment lists joined with `/`), values are
//! JSON-serialized status snapshots. Only jobs whose request declared an id
//! and whose type allows serialization ever land here.

use crate::error::StorageError;
use crate::job::status::JobStatusSnapshot;
use sled::{Db, Tree};
use std::io;
use std::sync::Arc;

const TREE_STATUS: &str = "job_status";
const KEY_SEPARATOR: char = '/';

#[derive(Clone)]
pub struct JobStatusStore {
    db: Db,
    statuses: Tree,
}

impl JobStatusStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let statuses = db.open_tree(TREE_STATUS).map_err(to_storage_io)?;
        Ok(Self { db, statuses })
    }

    pub fn shared(db: Db) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::new(db)?))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn put(&self, id: &[String], snapshot: &JobStatusSnapshot) -> Result<(), StorageError> {
        let key = encode_id(id)?;
        let value = serde_json::to_vec(snapshot).map_err(|e| to_corrupt(&key, e))?;
        self.statuses
            .insert(key.as_bytes(), value)
            .map_err(to_storage_io)?;
        Ok(())
    }

    pub fn get(&self, id: &[String]) -> Result<Option<JobStatusSnapshot>, StorageError> {
        let key = encode_id(id)?;
        let Some(raw) = self.statuses.get(key.as_bytes()).map_err(to_storage_io)? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(|e| to_corrupt(&key, e))?;
        Ok(Some(parsed))
    }

    /// All stored statuses whose id starts with `prefix` (every status when
    /// the prefix is empty), ordered by key.
    pub fn list(&self, prefix: &[String]) -> Result<Vec<(Vec<String>, JobStatusSnapshot)>, StorageError> {
        let prefix_key = if prefix.is_empty() {
            String::new()
        } else {
            encode_id(prefix)?
        };
        let mut out = Vec::new();
        for result in self.statuses.scan_prefix(prefix_key.as_bytes()) {
            let (key, value) = result.map_err(to_storage_io)?;
            let key = String::from_utf8_lossy(&key).to_string();
            let parsed: JobStatusSnapshot =
                serde_json::from_slice(&value).map_err(|e| to_corrupt(&key, e))?;
            out.push((decode_id(&key), parsed));
        }
        Ok(out)
    }

    pub fn delete(&self, id: &[String]) -> Result<bool, StorageError> {
        let key = encode_id(id)?;
        let removed = self
            .statuses
            .remove(key.as_bytes())
            .map_err(to_storage_io)?;
        Ok(removed.is_some())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }
}

fn encode_id(id: &[String]) -> Result<String, StorageError> {
    if id.is_empty() {
        return Err(StorageError::InvalidKey("empty job id".to_string()));
    }
    if let Some(segment) = id
        .iter()
        .find(|s| s.is_empty() || s.contains(KEY_SEPARATOR))
    {
        return Err(StorageError::InvalidKey(format!(
            "invalid job id segment: {segment:?}"
        )));
    }
    Ok(id.join(&KEY_SEPARATOR.to_string()))
}

fn decode_id(key: &str) -> Vec<String> {
    key.split(KEY_SEPARATOR).map(str::to_string).collect()
}

fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn to_corrupt(key: &str, err: serde_json::Error) -> StorageError {
    StorageError::CorruptRecord {
        key: key.to_string(),
        detail: err.to_string(),
    }
}
