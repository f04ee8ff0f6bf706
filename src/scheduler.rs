//! Plan scheduler: walks levels strictly in order.
//!
//! Level `i + 1` is entered only on the poll after level `i` resolved
//! `Complete`. Each resolution is committed to the plan store; an `Error`
//! resolution stops the plan until the caller restarts the failed services
//! and calls `start()` again.

use crate::attributes::{AttrValue, AttributeBag};
use crate::error::BootError;
use crate::hooks::BootHooks;
use crate::level::{LevelGroup, LevelStatus};
use crate::plan::PlanDescriptor;
use crate::registry::ServiceRegistry;
use crate::remote::Backends;
use crate::service::{
    Service, ServiceProgress, ServiceState, ServiceView, ShutdownState, StepContext,
};
use crate::store::{PlanSnapshot, PlanStore};
use crate::types::{now_millis, PlanStatus, RunId};
use std::sync::Arc;
use tracing::{info, info_span, warn, Span};

/// Hooks and logging span for one scheduler.
#[derive(Debug)]
pub struct SchedulerConfig {
    pub hooks: BootHooks,
    /// Parent span for every event the plan emits. A disabled span is
    /// replaced by a `plan` span carrying the run id.
    pub span: Span,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hooks: BootHooks::default(),
            span: Span::none(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_hooks(mut self, hooks: BootHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct ShutdownCursor {
    level: usize,
    force: bool,
    begun: bool,
}

pub struct BootScheduler {
    run_id: RunId,
    status: PlanStatus,
    current: usize,
    started: bool,
    levels: Vec<LevelGroup>,
    registry: ServiceRegistry,
    bag: AttributeBag,
    backends: Backends,
    store: Arc<dyn PlanStore>,
    hooks: BootHooks,
    span: Span,
    created_at_ms: u64,
    shutdown: Option<ShutdownCursor>,
}

impl BootScheduler {
    /// Build a fresh, pending plan from a validated descriptor.
    pub fn from_descriptor(
        run_id: RunId,
        descriptor: &PlanDescriptor,
        backends: Backends,
        store: Arc<dyn PlanStore>,
        config: SchedulerConfig,
    ) -> Result<Self, BootError> {
        descriptor.validate()?;
        let mut registry = ServiceRegistry::new();
        let mut bag = AttributeBag::new();
        let mut levels = Vec::with_capacity(descriptor.levels.len());
        for (index, level) in descriptor.levels.iter().enumerate() {
            let mut members = Vec::with_capacity(level.services.len());
            for spec in &level.services {
                bag.register(spec.name.clone());
                members.push(spec.name.clone());
                registry.insert(Service::new(spec.clone(), index))?;
            }
            levels.push(LevelGroup::new(index, members));
        }
        Ok(Self::assemble(
            run_id,
            PlanStatus::Pending,
            now_millis(),
            levels,
            registry,
            bag,
            backends,
            store,
            config,
        ))
    }

    /// Rebuild a plan from its last committed snapshot.
    pub fn from_snapshot(
        snapshot: PlanSnapshot,
        backends: Backends,
        store: Arc<dyn PlanStore>,
        config: SchedulerConfig,
    ) -> Result<Self, BootError> {
        let mut registry = ServiceRegistry::new();
        let mut bag = AttributeBag::new();
        let mut levels = Vec::with_capacity(snapshot.levels.len());
        for (index, records) in snapshot.levels.into_iter().enumerate() {
            let mut members = Vec::with_capacity(records.len());
            for record in records {
                let (service, producer, values) = Service::from_record(record, index);
                bag.restore(service.name().clone(), producer, values);
                members.push(service.name().clone());
                registry.insert(service)?;
            }
            levels.push(LevelGroup::new(index, members));
        }
        if levels.is_empty() {
            return Err(BootError::config(format!(
                "Stored plan {} has no levels",
                snapshot.run_id
            )));
        }
        Ok(Self::assemble(
            snapshot.run_id,
            snapshot.status,
            snapshot.created_at_ms,
            levels,
            registry,
            bag,
            backends,
            store,
            config,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        run_id: RunId,
        status: PlanStatus,
        created_at_ms: u64,
        levels: Vec<LevelGroup>,
        registry: ServiceRegistry,
        bag: AttributeBag,
        backends: Backends,
        store: Arc<dyn PlanStore>,
        config: SchedulerConfig,
    ) -> Self {
        let span = if config.span.is_none() {
            info_span!("plan", run_id = %run_id)
        } else {
            config.span
        };
        Self {
            run_id,
            status,
            current: 0,
            started: false,
            levels,
            registry,
            bag,
            backends,
            store,
            hooks: config.hooks,
            span,
            created_at_ms,
            shutdown: None,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn current_level(&self) -> usize {
        self.current
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Mark the plan active. Never blocks.
    ///
    /// The first call in a process begins at level 0. After an `Error`
    /// resolution a further call resumes driving the current level; services
    /// that already succeeded are not restarted. Otherwise a no-op.
    pub fn start(&mut self) {
        let _guard = self.span.enter();
        if !self.started {
            self.started = true;
            self.current = 0;
            self.status = PlanStatus::Active;
            info!(levels = self.levels.len(), "Plan started");
        } else if self.status == PlanStatus::Error {
            self.status = PlanStatus::Active;
            info!(level = self.current, "Plan resumed");
        }
    }

    /// Drive the current level by one step.
    ///
    /// Service failures are reported through the returned status, not as
    /// errors. Once terminal, further polls return the same status and do
    /// nothing.
    pub fn poll(&mut self) -> Result<PlanStatus, BootError> {
        if !self.started {
            return Err(BootError::usage(format!(
                "Plan {} must be started before it is polled",
                self.run_id
            )));
        }
        if self.status.is_terminal() {
            return Ok(self.status);
        }
        if self.shutdown.is_some() {
            return Err(BootError::usage(format!(
                "Plan {} is shutting down",
                self.run_id
            )));
        }
        if self.is_torn_down() {
            return Err(BootError::usage(format!(
                "Plan {} has shut-down services and cannot boot further levels",
                self.run_id
            )));
        }
        let span = self.span.clone();
        let _guard = span.enter();

        let index = self.current;
        let level_status = {
            let mut ctx = StepContext {
                run_id: &self.run_id,
                provisioner: self.backends.provisioner.as_mut(),
                executor: self.backends.executor.as_mut(),
                bag: &mut self.bag,
                hooks: &mut self.hooks,
            };
            let level = &mut self.levels[index];
            if !level.is_started() {
                level.begin(&mut self.registry, &mut ctx)?;
            }
            level.poll(&mut self.registry, &mut ctx)?
        };

        // The status only turns terminal once the store holds it; a failed
        // commit is retried by the next poll.
        match level_status {
            LevelStatus::Complete if index + 1 == self.levels.len() => {
                self.commit_as(PlanStatus::Complete)?;
                self.status = PlanStatus::Complete;
                info!("Plan complete");
            }
            LevelStatus::Complete => {
                self.commit()?;
                self.current += 1;
            }
            LevelStatus::Error => {
                self.commit_as(PlanStatus::Error)?;
                self.status = PlanStatus::Error;
                warn!(
                    level = index,
                    failed = self.levels[index].failed(&self.registry).len(),
                    "Plan stopped on failed level"
                );
            }
            LevelStatus::Pending | LevelStatus::Running => {}
        }
        Ok(self.status)
    }

    /// Restart one service through its own `start()`.
    ///
    /// The plan status is untouched; call `start()` afterwards to resume a
    /// plan that stopped on this service's level.
    ///
    /// Only failed or ready services can be restarted, and only up to the
    /// first level that has not resolved `Complete`.
    pub fn restart_service(&mut self, name: &str) -> Result<(), BootError> {
        let service = self.registry.get_or_error(name)?;
        if service.state() == ServiceState::NotStarted {
            return Err(BootError::usage(format!(
                "Service '{}' has not been started; the plan boots it with its level",
                name
            )));
        }
        let frontier = self.frontier();
        if service.level() > frontier {
            return Err(BootError::usage(format!(
                "Service '{}' is in level {} but level {} has not completed",
                name,
                service.level(),
                frontier
            )));
        }
        self.with_service(name, |service, ctx| service.start(ctx))
    }

    /// Poll one service outside the level walk.
    pub fn poll_service(&mut self, name: &str) -> Result<ServiceProgress, BootError> {
        self.with_service(name, |service, ctx| service.poll(ctx))
    }

    pub fn shutdown_service(&mut self, name: &str, force: bool) -> Result<(), BootError> {
        self.with_service(name, |service, ctx| service.shutdown(force, ctx))
    }

    pub fn poll_service_shutdown(&mut self, name: &str) -> Result<ShutdownState, BootError> {
        self.with_service(name, |service, ctx| Ok(service.poll_shutdown(ctx)))
    }

    /// Begin shutting down every started service, last level first.
    ///
    /// Refused while the plan is still driving in-flight services.
    pub fn shutdown(&mut self, force: bool) -> Result<(), BootError> {
        if self.registry.iter().any(|s| s.state().is_in_flight()) {
            return Err(BootError::usage(format!(
                "Plan {} has services in flight; wait for the current level to resolve",
                self.run_id
            )));
        }
        if self.shutdown.is_some() {
            return Err(BootError::usage(format!(
                "Plan {} is already shutting down",
                self.run_id
            )));
        }
        let _guard = self.span.enter();
        info!(force, "Plan shutdown requested");
        self.shutdown = Some(ShutdownCursor {
            level: self.levels.len() - 1,
            force,
            begun: false,
        });
        Ok(())
    }

    /// Advance the shutdown by one step; `true` once every level settled and
    /// the result was committed.
    pub fn poll_shutdown(&mut self) -> Result<bool, BootError> {
        let Some(mut cursor) = self.shutdown else {
            return Err(BootError::usage(format!(
                "Plan {} has no shutdown in progress",
                self.run_id
            )));
        };
        let span = self.span.clone();
        let _guard = span.enter();

        let settled = {
            let mut ctx = StepContext {
                run_id: &self.run_id,
                provisioner: self.backends.provisioner.as_mut(),
                executor: self.backends.executor.as_mut(),
                bag: &mut self.bag,
                hooks: &mut self.hooks,
            };
            let members = self.levels[cursor.level].members();
            if !cursor.begun {
                for name in members {
                    let service = self.registry.get_mut_or_error(name.as_str())?;
                    let eligible = service.is_terminal()
                        && matches!(
                            service.shutdown_state(),
                            ShutdownState::Active | ShutdownState::Failed
                        );
                    if eligible {
                        service.shutdown(cursor.force, &mut ctx)?;
                    }
                }
                cursor.begun = true;
            }
            let mut settled = true;
            for name in members {
                let service = self.registry.get_mut_or_error(name.as_str())?;
                settled &= service.poll_shutdown(&mut ctx).is_settled();
            }
            settled
        };

        if !settled {
            self.shutdown = Some(cursor);
            return Ok(false);
        }
        info!(level = cursor.level, "Level shut down");
        if cursor.level == 0 {
            self.shutdown = None;
            self.commit()?;
            info!("Plan shutdown finished");
            return Ok(true);
        }
        cursor.level -= 1;
        cursor.begun = false;
        self.shutdown = Some(cursor);
        Ok(false)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Whether any service has been shut down, so later levels would read
    /// attributes of torn-down producers.
    pub fn is_torn_down(&self) -> bool {
        self.registry
            .iter()
            .any(|service| service.shutdown_state() != ShutdownState::Active)
    }

    /// Index of the first level not resolved `Complete`, or the level count.
    fn frontier(&self) -> usize {
        self.levels
            .iter()
            .position(|level| level.status(&self.registry) != LevelStatus::Complete)
            .unwrap_or(self.levels.len())
    }

    pub fn service(&self, name: &str) -> Result<ServiceView, BootError> {
        Ok(self.registry.get_or_error(name)?.view(&self.bag))
    }

    pub fn level(&self, index: usize) -> Result<Vec<ServiceView>, BootError> {
        let level = self.levels.get(index).ok_or_else(|| {
            BootError::usage(format!(
                "Level {} out of range (plan has {} levels)",
                index,
                self.levels.len()
            ))
        })?;
        Ok(level.views(&self.registry, &self.bag))
    }

    pub fn level_status(&self, index: usize) -> Option<LevelStatus> {
        self.levels
            .get(index)
            .map(|level| level.status(&self.registry))
    }

    pub fn services(&self) -> Vec<Vec<ServiceView>> {
        self.levels
            .iter()
            .map(|level| level.views(&self.registry, &self.bag))
            .collect()
    }

    /// Per level, only the services in `Error`.
    pub fn errors(&self) -> Vec<Vec<ServiceView>> {
        self.services()
            .into_iter()
            .map(|views| views.into_iter().filter(ServiceView::is_error).collect())
            .collect()
    }

    pub fn attribute(&self, service: &str, key: &str) -> Result<AttrValue, BootError> {
        self.bag.read(service, key).cloned()
    }

    pub fn snapshot(&self) -> PlanSnapshot {
        self.snapshot_as(self.status)
    }

    fn snapshot_as(&self, status: PlanStatus) -> PlanSnapshot {
        let mut levels = vec![Vec::new(); self.levels.len()];
        for service in self.registry.iter() {
            if let Some(records) = levels.get_mut(service.level()) {
                records.push(service.to_record(&self.bag));
            }
        }
        PlanSnapshot {
            run_id: self.run_id.clone(),
            status,
            current_level: self.current,
            created_at_ms: self.created_at_ms,
            updated_at_ms: now_millis(),
            levels,
        }
    }

    pub fn commit(&self) -> Result<(), BootError> {
        self.commit_as(self.status)
    }

    fn commit_as(&self, status: PlanStatus) -> Result<(), BootError> {
        self.store.commit(&self.snapshot_as(status))?;
        Ok(())
    }

    fn with_service<T>(
        &mut self,
        name: &str,
        op: impl FnOnce(&mut Service, &mut StepContext<'_>) -> Result<T, BootError>,
    ) -> Result<T, BootError> {
        let span = self.span.clone();
        let _guard = span.enter();
        let mut ctx = StepContext {
            run_id: &self.run_id,
            provisioner: self.backends.provisioner.as_mut(),
            executor: self.backends.executor.as_mut(),
            bag: &mut self.bag,
            hooks: &mut self.hooks,
        };
        let service = self.registry.get_mut_or_error(name)?;
        op(service, &mut ctx)
    }
}
