//! Error types for the Cloudboot orchestration engine.

use crate::types::ServiceName;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Corrupt record for run {run_id}: {message}")]
    CorruptRecord { run_id: String, message: String },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure reported by a provisioning backend or script executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RemoteError(pub String);

impl RemoteError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Lifecycle step at which a service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStep {
    Dependencies,
    Provisioning,
    Contextualizing,
    ReadyCheck,
    Shutdown,
}

impl FailedStep {
    pub fn as_str(self) -> &'static str {
        match self {
            FailedStep::Dependencies => "dependencies",
            FailedStep::Provisioning => "provisioning",
            FailedStep::Contextualizing => "contextualizing",
            FailedStep::ReadyCheck => "ready_check",
            FailedStep::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FailedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured detail recorded on a service when one of its steps fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFailure {
    pub step: FailedStep,
    pub cause: String,
}

impl ServiceFailure {
    pub fn new(step: FailedStep, cause: impl Into<String>) -> Self {
        Self {
            step,
            cause: cause.into(),
        }
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.step, self.cause)
    }
}

/// Coarse classification of a [`BootError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    Service,
    Dependency,
    Config,
    AttributeConflict,
    Storage,
}

/// Errors surfaced by the boot plan API
#[derive(Debug, Error)]
pub enum BootError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Service '{service}' {failure}")]
    Service {
        service: ServiceName,
        failure: ServiceFailure,
    },

    #[error("Dependency {service}.{key} is not available yet")]
    DependencyNotReady { service: ServiceName, key: String },

    #[error("Dependency {service}.{key} cannot be satisfied: service '{service}' failed")]
    DependencyFailed { service: ServiceName, key: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Attribute '{key}' was already written for service '{service}'")]
    AttributeConflict { service: ServiceName, key: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl BootError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BootError::Usage(_) => ErrorKind::Usage,
            BootError::Service { .. } => ErrorKind::Service,
            BootError::DependencyNotReady { .. } | BootError::DependencyFailed { .. } => {
                ErrorKind::Dependency
            }
            BootError::Config(_) => ErrorKind::Config,
            BootError::AttributeConflict { .. } => ErrorKind::AttributeConflict,
            BootError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True for the transient "producer has not finished yet" condition.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, BootError::DependencyNotReady { .. })
    }
}

impl From<config::ConfigError> for BootError {
    fn from(err: config::ConfigError) -> Self {
        BootError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for BootError {
    fn from(err: toml::de::Error) -> Self {
        BootError::Config(err.to_string())
    }
}
