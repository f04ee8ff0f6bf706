//! `CloudBoot`: the caller-facing facade over a plan scheduler.
//!
//! Construction either loads a fresh plan from a descriptor or reloads a run
//! from the plan store. Progress happens only inside [`CloudBoot::poll`];
//! [`CloudBoot::block_until_complete`] is a convenience loop that sleeps the
//! caller's interval between polls.

use crate::attributes::AttrValue;
use crate::error::BootError;
use crate::level::LevelStatus;
use crate::plan::PlanDescriptor;
use crate::remote::Backends;
use crate::scheduler::{BootScheduler, SchedulerConfig};
use crate::service::{ServiceProgress, ServiceView, ShutdownState};
use crate::store::{PlanSnapshot, PlanStore};
use crate::types::{PlanStatus, RunId};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct CloudBoot {
    scheduler: BootScheduler,
}

impl CloudBoot {
    /// Create a new run from a plan descriptor.
    ///
    /// Without an explicit run id a short random one is generated. The pending
    /// topology is committed immediately so the run can be reloaded even
    /// before its first level resolves.
    pub fn from_config(
        descriptor: &PlanDescriptor,
        run_id: Option<RunId>,
        backends: Backends,
        store: Arc<dyn PlanStore>,
        config: SchedulerConfig,
    ) -> Result<Self, BootError> {
        let run_id = run_id.unwrap_or_else(RunId::generate);
        if store.load(&run_id)?.is_some() {
            return Err(BootError::usage(format!(
                "Run {} already exists; reload it instead",
                run_id
            )));
        }
        let scheduler =
            BootScheduler::from_descriptor(run_id, descriptor, backends, store, config)?;
        scheduler.commit()?;
        info!(
            run_id = %scheduler.run_id(),
            levels = scheduler.level_count(),
            services = descriptor.service_count(),
            "Created boot plan"
        );
        Ok(Self { scheduler })
    }

    /// Reload a stored run.
    pub fn from_store(
        run_id: &RunId,
        backends: Backends,
        store: Arc<dyn PlanStore>,
        config: SchedulerConfig,
    ) -> Result<Self, BootError> {
        let snapshot = store
            .load(run_id)?
            .ok_or_else(|| BootError::usage(format!("No stored run named {}", run_id)))?;
        let scheduler = BootScheduler::from_snapshot(snapshot, backends, store, config)?;
        info!(run_id = %run_id, status = %scheduler.status(), "Reloaded boot plan");
        Ok(Self { scheduler })
    }

    pub fn run_id(&self) -> &RunId {
        self.scheduler.run_id()
    }

    pub fn status(&self) -> PlanStatus {
        self.scheduler.status()
    }

    pub fn current_level(&self) -> usize {
        self.scheduler.current_level()
    }

    pub fn start(&mut self) {
        self.scheduler.start();
    }

    /// One non-blocking step. Usage error before `start()` and once any
    /// service has been shut down.
    pub fn poll(&mut self) -> Result<PlanStatus, BootError> {
        self.scheduler.poll()
    }

    /// Poll until the plan is `Complete` or `Error`, sleeping `interval`
    /// between polls.
    pub fn block_until_complete(&mut self, interval: Duration) -> Result<PlanStatus, BootError> {
        loop {
            let status = self.poll()?;
            if status.is_terminal() {
                return Ok(status);
            }
            std::thread::sleep(interval);
        }
    }

    pub fn get_service(&self, name: &str) -> Result<ServiceView, BootError> {
        self.scheduler.service(name)
    }

    pub fn get_level(&self, index: usize) -> Result<Vec<ServiceView>, BootError> {
        self.scheduler.level(index)
    }

    pub fn level_status(&self, index: usize) -> Option<LevelStatus> {
        self.scheduler.level_status(index)
    }

    pub fn get_level_count(&self) -> usize {
        self.scheduler.level_count()
    }

    /// Views of every service, grouped by level.
    pub fn get_services(&self) -> Vec<Vec<ServiceView>> {
        self.scheduler.services()
    }

    /// Per level, the services currently in `Error`.
    pub fn error_status(&self) -> Vec<Vec<ServiceView>> {
        self.scheduler.errors()
    }

    pub fn attribute(&self, service: &str, key: &str) -> Result<AttrValue, BootError> {
        self.scheduler.attribute(service, key)
    }

    /// Restart a failed or ready service. Services of levels past the first
    /// incomplete one are refused.
    pub fn restart_service(&mut self, name: &str) -> Result<(), BootError> {
        self.scheduler.restart_service(name)
    }

    /// Drive one service without advancing the plan.
    pub fn poll_service(&mut self, name: &str) -> Result<ServiceProgress, BootError> {
        self.scheduler.poll_service(name)
    }

    pub fn shutdown_service(&mut self, name: &str, force: bool) -> Result<(), BootError> {
        self.scheduler.shutdown_service(name, force)
    }

    pub fn poll_service_shutdown(&mut self, name: &str) -> Result<ShutdownState, BootError> {
        self.scheduler.poll_service_shutdown(name)
    }

    /// Begin a plan-wide shutdown, last level first.
    pub fn shutdown(&mut self, force: bool) -> Result<(), BootError> {
        self.scheduler.shutdown(force)
    }

    pub fn poll_shutdown(&mut self) -> Result<bool, BootError> {
        self.scheduler.poll_shutdown()
    }

    pub fn block_until_shutdown(&mut self, interval: Duration) -> Result<(), BootError> {
        while !self.poll_shutdown()? {
            std::thread::sleep(interval);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> PlanSnapshot {
        self.scheduler.snapshot()
    }
}
