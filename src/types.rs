//! Identifiers and status enums shared across the engine.

use crate::error::BootError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Validated service name, unique within a plan.
///
/// Names are non-empty and limited to ASCII alphanumerics, `-` and `_`. The
/// `.` is reserved as the separator in `${service.key}` references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(raw: impl Into<String>) -> Result<Self, BootError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(BootError::config("Service name cannot be empty"));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(BootError::config(format!(
                "Service name '{}' contains invalid character {:?}",
                raw, bad
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceName {
    type Error = BootError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(value: ServiceName) -> Self {
        value.0
    }
}

impl Borrow<str> for ServiceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one boot plan run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    pub fn new(raw: impl Into<String>) -> Result<Self, BootError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(BootError::usage("Run name cannot be empty"));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BootError::usage(format!("Invalid run name: {}", raw)));
        }
        Ok(Self(raw))
    }

    /// Fresh run id: the first group of a random v4 UUID.
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().to_string();
        let short = uuid.split('-').next().unwrap_or(&uuid).to_string();
        Self(short)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunId {
    type Error = BootError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RunId> for String {
    fn from(value: RunId) -> Self {
        value.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag passed to level and service callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Starting,
    Transition,
    Complete,
    Error,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Starting => "starting",
            Action::Transition => "transition",
            Action::Complete => "complete",
            Action::Error => "error",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Active,
    Complete,
    Error,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Active => "active",
            PlanStatus::Complete => "complete",
            PlanStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Complete | PlanStatus::Error)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
