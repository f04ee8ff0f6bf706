//! Level groups: sets of independent services driven together.

use crate::attributes::AttributeBag;
use crate::error::BootError;
use crate::registry::ServiceRegistry;
use crate::service::{Service, ServiceState, ServiceView, StepContext};
use crate::types::{Action, ServiceName};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl LevelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelStatus::Pending => "pending",
            LevelStatus::Running => "running",
            LevelStatus::Complete => "complete",
            LevelStatus::Error => "error",
        }
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, LevelStatus::Complete | LevelStatus::Error)
    }
}

impl fmt::Display for LevelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct LevelGroup {
    index: usize,
    members: Vec<ServiceName>,
    started: bool,
    reported: Option<LevelStatus>,
}

impl LevelGroup {
    pub fn new(index: usize, members: Vec<ServiceName>) -> Self {
        Self {
            index,
            members,
            started: false,
            reported: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn members(&self) -> &[ServiceName] {
        &self.members
    }

    /// Whether this level has been entered in this process.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Resolution is a pure function of member states.
    pub fn status(&self, registry: &ServiceRegistry) -> LevelStatus {
        let states: Vec<ServiceState> = self
            .members
            .iter()
            .filter_map(|name| registry.get(name.as_str()))
            .map(|service| service.state())
            .collect();
        if states.iter().all(|state| state.is_terminal()) {
            if states.contains(&ServiceState::Error) {
                LevelStatus::Error
            } else {
                LevelStatus::Complete
            }
        } else if self.started || states.iter().any(|state| state.is_in_flight()) {
            LevelStatus::Running
        } else {
            LevelStatus::Pending
        }
    }

    /// Enter the level: fire `starting`, boot `NotStarted` members and
    /// re-verify `Ready` ones. Failed members are left for the caller.
    pub fn begin(
        &mut self,
        registry: &mut ServiceRegistry,
        ctx: &mut StepContext<'_>,
    ) -> Result<(), BootError> {
        self.started = true;
        self.reported = None;
        info!(level = self.index, members = self.members.len(), "Entering level");
        ctx.hooks.level(ctx.run_id, Action::Starting, self.index);

        for name in &self.members {
            let service = registry.get_mut_or_error(name.as_str())?;
            match service.state() {
                ServiceState::NotStarted | ServiceState::Ready => start_member(service, ctx)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Advance every non-terminal member by one step and report the result.
    ///
    /// `complete`/`error` fire once per resolution; a member restarted after
    /// that re-arms them.
    pub fn poll(
        &mut self,
        registry: &mut ServiceRegistry,
        ctx: &mut StepContext<'_>,
    ) -> Result<LevelStatus, BootError> {
        let mut changed = false;
        for name in &self.members {
            let service = registry.get_mut_or_error(name.as_str())?;
            let before = service.state();
            match before {
                ServiceState::NotStarted => start_member(service, ctx)?,
                state if state.is_in_flight() => {
                    service.poll(ctx)?;
                }
                _ => {}
            }
            changed |= service.state() != before;
        }
        if changed {
            ctx.hooks.level(ctx.run_id, Action::Transition, self.index);
        }

        let status = self.status(registry);
        match status {
            LevelStatus::Complete | LevelStatus::Error if self.reported != Some(status) => {
                self.reported = Some(status);
                if status == LevelStatus::Complete {
                    info!(level = self.index, "Level complete");
                    ctx.hooks.level(ctx.run_id, Action::Complete, self.index);
                } else {
                    let failed = self.failed(registry);
                    warn!(level = self.index, failed = failed.len(), "Level failed");
                    ctx.hooks.level(ctx.run_id, Action::Error, self.index);
                }
            }
            LevelStatus::Complete | LevelStatus::Error => {}
            LevelStatus::Pending | LevelStatus::Running => self.reported = None,
        }
        Ok(status)
    }

    /// Members currently in `Error`.
    pub fn failed(&self, registry: &ServiceRegistry) -> Vec<ServiceName> {
        self.members
            .iter()
            .filter(|name| {
                registry
                    .get(name.as_str())
                    .map(|service| service.state() == ServiceState::Error)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn views(&self, registry: &ServiceRegistry, bag: &AttributeBag) -> Vec<ServiceView> {
        self.members
            .iter()
            .filter_map(|name| registry.get(name.as_str()))
            .map(|service| service.view(bag))
            .collect()
    }
}

/// Start a member, leaving it untouched if an upstream is not ready yet.
fn start_member(service: &mut Service, ctx: &mut StepContext<'_>) -> Result<(), BootError> {
    match service.start(ctx) {
        Err(e) if e.is_not_ready() => {
            warn!(service = %service.name(), error = %e, "Deferring start");
            Ok(())
        }
        other => other,
    }
}
