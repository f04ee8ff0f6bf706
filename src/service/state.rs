//! Lifecycle and shutdown states of a service.

use crate::error::FailedStep;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    NotStarted,
    Provisioning,
    Contextualizing,
    ReadyCheck,
    Ready,
    Error,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::NotStarted => "not_started",
            ServiceState::Provisioning => "provisioning",
            ServiceState::Contextualizing => "contextualizing",
            ServiceState::ReadyCheck => "ready_check",
            ServiceState::Ready => "ready",
            ServiceState::Error => "error",
        }
    }

    /// `Ready` or `Error`; a level resolves once every member is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Ready | ServiceState::Error)
    }

    /// Waiting on a remote operation.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            ServiceState::Provisioning | ServiceState::Contextualizing | ServiceState::ReadyCheck
        )
    }

    /// Step a failure in this state is attributed to.
    pub fn failed_step(self) -> Option<FailedStep> {
        match self {
            ServiceState::Provisioning => Some(FailedStep::Provisioning),
            ServiceState::Contextualizing => Some(FailedStep::Contextualizing),
            ServiceState::ReadyCheck => Some(FailedStep::ReadyCheck),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shutdown sub-lifecycle, independent of [`ServiceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownState {
    #[default]
    Active,
    ShuttingDown,
    Terminated,
    Failed,
}

impl ShutdownState {
    pub fn as_str(self) -> &'static str {
        match self {
            ShutdownState::Active => "active",
            ShutdownState::ShuttingDown => "shutting_down",
            ShutdownState::Terminated => "terminated",
            ShutdownState::Failed => "failed",
        }
    }

    pub fn is_settled(self) -> bool {
        !matches!(self, ShutdownState::ShuttingDown)
    }
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
