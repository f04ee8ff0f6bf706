use super::state::{ServiceState, ShutdownState};
use crate::attributes::Attributes;
use crate::error::{BootError, ServiceFailure};
use crate::types::ServiceName;
use serde::Serialize;

/// Read-only snapshot of one service for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceView {
    pub name: ServiceName,
    pub level: usize,
    pub target: String,
    pub state: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ServiceFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub attributes: Attributes,
    pub shutdown: ShutdownState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_failure: Option<String>,
}

impl ServiceView {
    pub fn is_error(&self) -> bool {
        self.state == ServiceState::Error
    }

    /// The recorded failure as a service error, if the service failed.
    pub fn to_error(&self) -> Option<BootError> {
        self.failure.clone().map(|failure| BootError::Service {
            service: self.name.clone(),
            failure,
        })
    }

    /// One-line status message, as reported in listings.
    pub fn message(&self) -> String {
        match &self.failure {
            Some(failure) => failure.to_string(),
            None => self.state.as_str().to_string(),
        }
    }
}
