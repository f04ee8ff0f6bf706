//! Sled-backed plan store.

use std::io;
use std::path::Path;

use sled::{Db, Tree};
use tracing::debug;

use super::{PlanSnapshot, PlanStore, RunSummary};
use crate::error::StorageError;
use crate::types::RunId;

const TREE_PLANS: &str = "plans";

#[derive(Clone)]
pub struct SledPlanStore {
    db: Db,
    plans: Tree,
}

impl SledPlanStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let plans = db.open_tree(TREE_PLANS).map_err(to_storage_io)?;
        Ok(Self { db, plans })
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(path).map_err(to_storage_io)?;
        Self::new(db)
    }

    /// Store backed by a sled database that is removed when dropped.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(to_storage_io)?;
        Self::new(db)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }

    /// Remove a stored run; `false` if there was none.
    pub fn delete(&self, run_id: &RunId) -> Result<bool, StorageError> {
        let removed = self
            .plans
            .remove(run_id.as_str().as_bytes())
            .map_err(to_storage_io)?;
        self.flush()?;
        Ok(removed.is_some())
    }
}

impl PlanStore for SledPlanStore {
    fn load(&self, run_id: &RunId) -> Result<Option<PlanSnapshot>, StorageError> {
        let Some(raw) = self
            .plans
            .get(run_id.as_str().as_bytes())
            .map_err(to_storage_io)?
        else {
            return Ok(None);
        };
        let snapshot = serde_json::from_slice(&raw).map_err(|e| StorageError::CorruptRecord {
            run_id: run_id.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(snapshot))
    }

    fn commit(&self, snapshot: &PlanSnapshot) -> Result<(), StorageError> {
        let value = serde_json::to_vec(snapshot).map_err(to_storage_data)?;
        self.plans
            .insert(snapshot.run_id.as_str().as_bytes(), value)
            .map_err(to_storage_io)?;
        self.flush()?;
        debug!(
            run_id = %snapshot.run_id,
            status = %snapshot.status,
            level = snapshot.current_level,
            "Committed plan snapshot"
        );
        Ok(())
    }

    fn list_runs(&self) -> Result<Vec<RunSummary>, StorageError> {
        let mut out = Vec::new();
        for result in self.plans.iter() {
            let (key, value) = result.map_err(to_storage_io)?;
            let snapshot: PlanSnapshot =
                serde_json::from_slice(&value).map_err(|e| StorageError::CorruptRecord {
                    run_id: String::from_utf8_lossy(&key).into_owned(),
                    message: e.to_string(),
                })?;
            out.push(snapshot.summary());
        }
        out.sort_by_key(|s| std::cmp::Reverse(s.updated_at_ms));
        Ok(out)
    }
}

fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}
