//! Seams to the outside world: compute provisioning and script execution.
//!
//! Both traits are poll-shaped. `launch`/`spawn` only start work; the engine
//! then calls `poll_launch`/`poll` from inside its own `poll()` until the
//! operation reports `Done`. Implementations must never block in any method.

pub mod local;

use crate::error::RemoteError;
use crate::types::{RunId, ServiceName};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub use local::LocalExecutor;

/// Result of polling an in-flight remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress<T> {
    Pending,
    Done(T),
}

/// Backend handle of a provisioned compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Executor handle of a running script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// Which program of a service a script request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    Contextualize,
    ReadyCheck,
    Shutdown,
}

impl ScriptStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptStep::Contextualize => "contextualize",
            ScriptStep::ReadyCheck => "ready_check",
            ScriptStep::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ScriptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub run_id: RunId,
    pub service: ServiceName,
    pub step: ScriptStep,
    /// Host the program acts on.
    pub host: String,
    pub program: String,
    /// Input document: configuration values merged with resolved dependencies.
    pub input: Map<String, Value>,
}

/// Completed script: exit status plus the raw output document, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub stderr: String,
}

impl ScriptOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Launches and tears down compute for image-backed services.
pub trait Provisioner {
    fn launch(&mut self, service: &ServiceName, image: &str) -> Result<InstanceId, RemoteError>;

    /// `Done` carries the address of the booted instance.
    fn poll_launch(&mut self, instance: &InstanceId) -> Result<Progress<String>, RemoteError>;

    fn terminate(&mut self, instance: &InstanceId) -> Result<(), RemoteError>;
}

/// Runs contextualization, readiness and shutdown programs.
pub trait ScriptExecutor {
    fn spawn(&mut self, request: ScriptRequest) -> Result<TaskId, RemoteError>;

    fn poll(&mut self, task: TaskId) -> Result<Progress<ScriptOutcome>, RemoteError>;
}

/// Provisioner for plans made only of address-bound services.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedProvisioner;

impl Provisioner for UnsupportedProvisioner {
    fn launch(&mut self, _service: &ServiceName, image: &str) -> Result<InstanceId, RemoteError> {
        Err(RemoteError::new(format!(
            "no provisioning backend configured; cannot launch image '{}'",
            image
        )))
    }

    fn poll_launch(&mut self, instance: &InstanceId) -> Result<Progress<String>, RemoteError> {
        Err(RemoteError::new(format!("unknown instance {}", instance)))
    }

    fn terminate(&mut self, instance: &InstanceId) -> Result<(), RemoteError> {
        Err(RemoteError::new(format!("unknown instance {}", instance)))
    }
}

/// The pair of backends a scheduler drives.
pub struct Backends {
    pub provisioner: Box<dyn Provisioner>,
    pub executor: Box<dyn ScriptExecutor>,
}

impl Backends {
    pub fn new(provisioner: Box<dyn Provisioner>, executor: Box<dyn ScriptExecutor>) -> Self {
        Self {
            provisioner,
            executor,
        }
    }
}
