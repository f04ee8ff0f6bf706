//! Persistence adapter: durable snapshots of plan runs.
//!
//! A snapshot is written only when a level or the whole plan reaches a terminal
//! state, or after a plan-wide shutdown. Loading a snapshot therefore never
//! resumes into a state that was not durable.

pub mod persistence;

use crate::attributes::Attributes;
use crate::error::{ServiceFailure, StorageError};
use crate::plan::ServiceSpec;
use crate::remote::InstanceId;
use crate::service::{ServiceState, ShutdownState};
use crate::types::{PlanStatus, RunId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use persistence::SledPlanStore;

/// Persisted form of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub spec: ServiceSpec,
    pub state: ServiceState,
    #[serde(default)]
    pub failure: Option<ServiceFailure>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub instance: Option<InstanceId>,
    /// Resolved input document, including contextualization outputs.
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub shutdown: ShutdownState,
    #[serde(default)]
    pub shutdown_failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub run_id: RunId,
    pub status: PlanStatus,
    pub current_level: usize,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub levels: Vec<Vec<ServiceRecord>>,
}

impl PlanSnapshot {
    pub fn summary(&self) -> RunSummary {
        let services = self.levels.iter().map(Vec::len).sum();
        let failed = self
            .levels
            .iter()
            .flatten()
            .filter(|record| record.state == ServiceState::Error)
            .count();
        RunSummary {
            run_id: self.run_id.clone(),
            status: self.status,
            levels: self.levels.len(),
            services,
            failed,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
        }
    }
}

/// Listing entry for a stored run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: PlanStatus,
    pub levels: usize,
    pub services: usize,
    pub failed: usize,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

pub trait PlanStore {
    fn load(&self, run_id: &RunId) -> Result<Option<PlanSnapshot>, StorageError>;

    /// Durably replace the snapshot of `snapshot.run_id`.
    fn commit(&self, snapshot: &PlanSnapshot) -> Result<(), StorageError>;

    /// Stored runs, most recently updated first.
    fn list_runs(&self) -> Result<Vec<RunSummary>, StorageError>;
}
