//! Per-service lifecycle state machine.
//!
//! `NotStarted -> Provisioning -> Contextualizing -> ReadyCheck -> Ready`, or
//! `Error` from any in-flight step. Remote work is started by `start()` and
//! advanced one sub-step at a time by `poll()`; neither ever blocks.
//!
//! Shutdown is a separate sub-lifecycle (`ShuttingDown -> Terminated`) that
//! leaves the lifecycle state intact for status reporting.

mod state;
mod view;

pub use state::{ServiceState, ShutdownState};
pub use view::ServiceView;

use crate::attributes::{AttributeBag, Attributes, ProducerState};
use crate::error::{BootError, FailedStep, ServiceFailure};
use crate::hooks::BootHooks;
use crate::plan::{DependencyRef, ProvisionTarget, ServiceSpec};
use crate::remote::{
    InstanceId, Progress, Provisioner, ScriptExecutor, ScriptOutcome, ScriptRequest, ScriptStep,
    TaskId,
};
use crate::store::ServiceRecord;
use crate::types::{Action, RunId, ServiceName};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Result of one `poll()` of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProgress {
    Working,
    Succeeded,
    Failed,
}

/// Everything a lifecycle step may touch outside the service itself.
pub struct StepContext<'a> {
    pub run_id: &'a RunId,
    pub provisioner: &'a mut dyn Provisioner,
    pub executor: &'a mut dyn ScriptExecutor,
    pub bag: &'a mut AttributeBag,
    pub hooks: &'a mut BootHooks,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Launch(InstanceId),
    Contextualize(TaskId),
    /// `publish` is false when re-verifying an already ready service.
    ReadyCheck { task: TaskId, publish: bool },
}

#[derive(Debug)]
pub struct Service {
    name: ServiceName,
    level: usize,
    spec: ServiceSpec,
    state: ServiceState,
    failure: Option<ServiceFailure>,
    host: Option<String>,
    instance: Option<InstanceId>,
    input: Map<String, Value>,
    pending: Option<PendingOp>,
    shutdown: ShutdownState,
    shutdown_failure: Option<String>,
    shutdown_task: Option<TaskId>,
}

impl Service {
    pub fn new(spec: ServiceSpec, level: usize) -> Self {
        Self {
            name: spec.name.clone(),
            level,
            spec,
            state: ServiceState::NotStarted,
            failure: None,
            host: None,
            instance: None,
            input: Map::new(),
            pending: None,
            shutdown: ShutdownState::Active,
            shutdown_failure: None,
            shutdown_task: None,
        }
    }

    /// Rebuild a service from its persisted record.
    ///
    /// A record caught mid-step is treated as failed at that step with cause
    /// "interrupted"; the caller decides whether to restart it. Returns the
    /// service together with the producer state and values for the bag.
    pub fn from_record(record: ServiceRecord, level: usize) -> (Self, ProducerState, Attributes) {
        let mut service = Self::new(record.spec, level);
        service.host = record.host;
        service.instance = record.instance;
        service.input = record.input;
        service.shutdown = record.shutdown;
        service.shutdown_failure = record.shutdown_failure;

        match record.state.failed_step() {
            Some(step) => {
                service.state = ServiceState::Error;
                service.failure = Some(ServiceFailure::new(step, "interrupted"));
            }
            None => {
                service.state = record.state;
                service.failure = record.failure;
            }
        }
        if service.shutdown == ShutdownState::ShuttingDown {
            service.shutdown = ShutdownState::Failed;
            service.shutdown_failure = Some("interrupted".to_string());
        }

        let producer = match service.state {
            ServiceState::Ready => ProducerState::Ready,
            ServiceState::Error => ProducerState::Failed,
            _ => ProducerState::Pending,
        };
        (service, producer, record.attributes)
    }

    pub fn to_record(&self, bag: &AttributeBag) -> ServiceRecord {
        ServiceRecord {
            spec: self.spec.clone(),
            state: self.state,
            failure: self.failure.clone(),
            host: self.host.clone(),
            instance: self.instance.clone(),
            input: self.input.clone(),
            attributes: bag.values(self.name.as_str()).cloned().unwrap_or_default(),
            shutdown: self.shutdown,
            shutdown_failure: self.shutdown_failure.clone(),
        }
    }

    pub fn view(&self, bag: &AttributeBag) -> ServiceView {
        ServiceView {
            name: self.name.clone(),
            level: self.level,
            target: self.spec.target.describe(),
            state: self.state,
            failure: self.failure.clone(),
            host: self.host.clone(),
            attributes: bag.values(self.name.as_str()).cloned().unwrap_or_default(),
            shutdown: self.shutdown,
            shutdown_failure: self.shutdown_failure.clone(),
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn failure(&self) -> Option<&ServiceFailure> {
        self.failure.as_ref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn instance(&self) -> Option<&InstanceId> {
        self.instance.as_ref()
    }

    /// Input document handed to this service's programs.
    pub fn input(&self) -> &Map<String, Value> {
        &self.input
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.shutdown
    }

    pub fn shutdown_failure(&self) -> Option<&str> {
        self.shutdown_failure.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Begin (or resume) the lifecycle.
    ///
    /// * `NotStarted`: resolve dependencies, then provision or bind the address.
    /// * `Ready`: re-run only the readiness check; nothing is republished.
    /// * `Error`: resume at the step that failed, reusing a provisioned host.
    ///
    /// Step failures are recorded on the service, not returned. An upstream
    /// that has not finished yet comes back as `DependencyNotReady` and leaves
    /// the service untouched.
    pub fn start(&mut self, ctx: &mut StepContext<'_>) -> Result<(), BootError> {
        if self.shutdown != ShutdownState::Active {
            return Err(BootError::usage(format!(
                "Service '{}' is {} and cannot be started",
                self.name, self.shutdown
            )));
        }
        match self.state {
            ServiceState::NotStarted => {
                let input = self.resolve_input(ctx.bag)?;
                ctx.hooks.service(&self.name, Action::Starting, "starting");
                match input {
                    Ok(input) => {
                        self.input = input;
                        self.launch(ctx);
                    }
                    Err(cause) => self.fail(FailedStep::Dependencies, cause, ctx),
                }
                Ok(())
            }
            ServiceState::Ready => {
                ctx.hooks
                    .service(&self.name, Action::Starting, "re-verifying readiness");
                self.begin_ready_check(false, ctx);
                Ok(())
            }
            ServiceState::Error => self.resume(ctx),
            in_flight => Err(BootError::usage(format!(
                "Service '{}' is already {}",
                self.name, in_flight
            ))),
        }
    }

    /// Advance at most one sub-step if the outstanding remote operation finished.
    pub fn poll(&mut self, ctx: &mut StepContext<'_>) -> Result<ServiceProgress, BootError> {
        if self.state == ServiceState::NotStarted {
            return Err(BootError::usage(format!(
                "Service '{}' has not been started",
                self.name
            )));
        }
        let Some(op) = self.pending.take() else {
            return Ok(self.progress());
        };
        match op {
            PendingOp::Launch(instance) => match ctx.provisioner.poll_launch(&instance) {
                Ok(Progress::Pending) => self.pending = Some(PendingOp::Launch(instance)),
                Ok(Progress::Done(host)) => {
                    info!(service = %self.name, host = %host, "Instance booted");
                    self.host = Some(host);
                    self.begin_contextualize(ctx);
                }
                Err(e) => self.fail(FailedStep::Provisioning, e.to_string(), ctx),
            },
            PendingOp::Contextualize(task) => match ctx.executor.poll(task) {
                Ok(Progress::Pending) => self.pending = Some(PendingOp::Contextualize(task)),
                Ok(Progress::Done(outcome)) => {
                    if let Some(outputs) =
                        self.accept_output(FailedStep::Contextualizing, outcome, true, ctx)
                    {
                        self.input.extend(outputs);
                        self.begin_ready_check(true, ctx);
                    }
                }
                Err(e) => self.fail(FailedStep::Contextualizing, e.to_string(), ctx),
            },
            PendingOp::ReadyCheck { task, publish } => match ctx.executor.poll(task) {
                Ok(Progress::Pending) => {
                    self.pending = Some(PendingOp::ReadyCheck { task, publish })
                }
                Ok(Progress::Done(outcome)) => {
                    if self
                        .accept_output(FailedStep::ReadyCheck, outcome, publish, ctx)
                        .is_some()
                    {
                        self.become_ready(ctx);
                    }
                }
                Err(e) => self.fail(FailedStep::ReadyCheck, e.to_string(), ctx),
            },
        }
        Ok(self.progress())
    }

    /// Begin shutdown. Without `force` the service's own shutdown program runs
    /// first; either way a provisioned instance is terminated afterwards.
    pub fn shutdown(&mut self, force: bool, ctx: &mut StepContext<'_>) -> Result<(), BootError> {
        if !self.state.is_terminal() {
            return Err(BootError::usage(format!(
                "Service '{}' is {}; only ready or failed services can be shut down",
                self.name, self.state
            )));
        }
        match self.shutdown {
            ShutdownState::ShuttingDown => {
                return Err(BootError::usage(format!(
                    "Service '{}' is already shutting down",
                    self.name
                )))
            }
            ShutdownState::Terminated => return Ok(()),
            ShutdownState::Active | ShutdownState::Failed => {}
        }
        self.shutdown_failure = None;

        let program = self.spec.shutdown_program.clone();
        match (force, program, self.host.clone()) {
            (false, Some(program), Some(host)) => {
                let request = self.request(ScriptStep::Shutdown, host, program, ctx.run_id);
                match ctx.executor.spawn(request) {
                    Ok(task) => {
                        self.shutdown = ShutdownState::ShuttingDown;
                        self.shutdown_task = Some(task);
                        ctx.hooks.service(
                            &self.name,
                            Action::Transition,
                            ShutdownState::ShuttingDown.as_str(),
                        );
                    }
                    Err(e) => self.fail_shutdown(e.to_string(), ctx),
                }
            }
            _ => self.teardown(ctx),
        }
        Ok(())
    }

    pub fn poll_shutdown(&mut self, ctx: &mut StepContext<'_>) -> ShutdownState {
        if self.shutdown != ShutdownState::ShuttingDown {
            return self.shutdown;
        }
        let Some(task) = self.shutdown_task.take() else {
            self.teardown(ctx);
            return self.shutdown;
        };
        match ctx.executor.poll(task) {
            Ok(Progress::Pending) => self.shutdown_task = Some(task),
            Ok(Progress::Done(outcome)) if outcome.success() => self.teardown(ctx),
            Ok(Progress::Done(outcome)) => {
                self.fail_shutdown(describe_exit(&outcome), ctx);
            }
            Err(e) => self.fail_shutdown(e.to_string(), ctx),
        }
        self.shutdown
    }

    fn progress(&self) -> ServiceProgress {
        match self.state {
            ServiceState::Ready => ServiceProgress::Succeeded,
            ServiceState::Error => ServiceProgress::Failed,
            _ => ServiceProgress::Working,
        }
    }

    /// Build the input document: configuration values plus resolved
    /// dependencies. The outer error is the transient not-ready condition;
    /// the inner one is a permanent dependency failure.
    fn resolve_input(
        &self,
        bag: &AttributeBag,
    ) -> Result<Result<Map<String, Value>, String>, BootError> {
        let mut input = self.spec.context.values.clone();
        for (key, dependency) in &self.spec.dependencies {
            let value = match dependency {
                DependencyRef::Literal(literal) => Value::String(literal.clone()),
                DependencyRef::Attribute { service, key: attr } => {
                    match bag.read(service.as_str(), attr) {
                        Ok(value) => value.clone(),
                        Err(e) if e.is_not_ready() => return Err(e),
                        Err(e) => return Ok(Err(e.to_string())),
                    }
                }
            };
            input.insert(key.clone(), value);
        }
        Ok(Ok(input))
    }

    fn resume(&mut self, ctx: &mut StepContext<'_>) -> Result<(), BootError> {
        let step = self
            .failure
            .as_ref()
            .map(|failure| failure.step)
            .unwrap_or(FailedStep::Dependencies);

        // Only contextualization outputs survive into a readiness retry.
        let input = if step == FailedStep::ReadyCheck && self.host.is_some() {
            Ok(self.input.clone())
        } else {
            self.resolve_input(ctx.bag)?
        };

        ctx.bag.set_state(&self.name, ProducerState::Pending);
        self.failure = None;
        ctx.hooks.service(
            &self.name,
            Action::Starting,
            &format!("restarting at {}", step),
        );
        info!(service = %self.name, step = %step, "Restarting failed service");

        let input = match input {
            Ok(input) => input,
            Err(cause) => {
                self.fail(FailedStep::Dependencies, cause, ctx);
                return Ok(());
            }
        };
        self.input = input;

        match step {
            FailedStep::Contextualizing if self.host.is_some() => self.begin_contextualize(ctx),
            FailedStep::ReadyCheck if self.host.is_some() => self.begin_ready_check(true, ctx),
            _ => {
                if let Some(stale) = self.instance.take() {
                    if let Err(e) = ctx.provisioner.terminate(&stale) {
                        warn!(
                            service = %self.name,
                            instance = %stale,
                            error = %e,
                            "Could not terminate stale instance"
                        );
                    }
                }
                self.host = None;
                self.launch(ctx);
            }
        }
        Ok(())
    }

    fn launch(&mut self, ctx: &mut StepContext<'_>) {
        match self.spec.target.clone() {
            ProvisionTarget::Image { image } => {
                match ctx.provisioner.launch(&self.name, &image) {
                    Ok(instance) => {
                        info!(service = %self.name, image = %image, instance = %instance, "Launching instance");
                        self.instance = Some(instance.clone());
                        self.pending = Some(PendingOp::Launch(instance));
                        self.set_state(ServiceState::Provisioning, ctx);
                    }
                    Err(e) => self.fail(FailedStep::Provisioning, e.to_string(), ctx),
                }
            }
            ProvisionTarget::Address { host } => {
                debug!(service = %self.name, host = %host, "Binding existing host");
                self.host = Some(host);
                self.begin_contextualize(ctx);
            }
        }
    }

    fn begin_contextualize(&mut self, ctx: &mut StepContext<'_>) {
        self.set_state(ServiceState::Contextualizing, ctx);
        let Some(program) = self.spec.context.program.clone() else {
            self.begin_ready_check(true, ctx);
            return;
        };
        if let Some(task) = self.spawn(
            ScriptStep::Contextualize,
            program,
            FailedStep::Contextualizing,
            ctx,
        ) {
            self.pending = Some(PendingOp::Contextualize(task));
        }
    }

    fn begin_ready_check(&mut self, publish: bool, ctx: &mut StepContext<'_>) {
        self.set_state(ServiceState::ReadyCheck, ctx);
        let Some(program) = self.spec.ready_program.clone() else {
            self.become_ready(ctx);
            return;
        };
        if let Some(task) =
            self.spawn(ScriptStep::ReadyCheck, program, FailedStep::ReadyCheck, ctx)
        {
            self.pending = Some(PendingOp::ReadyCheck { task, publish });
        }
    }

    fn spawn(
        &mut self,
        step: ScriptStep,
        program: String,
        failed_step: FailedStep,
        ctx: &mut StepContext<'_>,
    ) -> Option<TaskId> {
        let Some(host) = self.host.clone() else {
            self.fail(failed_step, "no host bound", ctx);
            return None;
        };
        let request = self.request(step, host, program, ctx.run_id);
        match ctx.executor.spawn(request) {
            Ok(task) => Some(task),
            Err(e) => {
                self.fail(failed_step, e.to_string(), ctx);
                None
            }
        }
    }

    fn request(
        &self,
        step: ScriptStep,
        host: String,
        program: String,
        run_id: &RunId,
    ) -> ScriptRequest {
        ScriptRequest {
            run_id: run_id.clone(),
            service: self.name.clone(),
            step,
            host,
            program,
            input: self.input.clone(),
        }
    }

    /// Check a finished script and publish its outputs. `None` means the
    /// service was failed.
    fn accept_output(
        &mut self,
        step: FailedStep,
        outcome: ScriptOutcome,
        publish: bool,
        ctx: &mut StepContext<'_>,
    ) -> Option<Attributes> {
        if !outcome.success() {
            self.fail(step, describe_exit(&outcome), ctx);
            return None;
        }
        let outputs = match parse_output(outcome.output.as_deref()) {
            Ok(outputs) => outputs,
            Err(cause) => {
                self.fail(step, cause, ctx);
                return None;
            }
        };
        // A retried step may repeat values it already published.
        let fresh: Attributes = match ctx.bag.values(self.name.as_str()) {
            Some(existing) => outputs
                .iter()
                .filter(|(key, value)| existing.get(*key) != Some(*value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            None => outputs.clone(),
        };
        if publish && !fresh.is_empty() {
            if let Err(e) = ctx.bag.write(&self.name, fresh) {
                self.fail(step, e.to_string(), ctx);
                return None;
            }
        }
        Some(outputs)
    }

    fn become_ready(&mut self, ctx: &mut StepContext<'_>) {
        self.state = ServiceState::Ready;
        self.failure = None;
        self.pending = None;
        ctx.bag.set_state(&self.name, ProducerState::Ready);
        info!(service = %self.name, level = self.level, "Service ready");
        ctx.hooks.service(&self.name, Action::Complete, "ready");
    }

    fn fail(&mut self, step: FailedStep, cause: impl Into<String>, ctx: &mut StepContext<'_>) {
        let failure = ServiceFailure::new(step, cause);
        warn!(
            service = %self.name,
            level = self.level,
            step = %failure.step,
            cause = %failure.cause,
            "Service failed"
        );
        let message = failure.to_string();
        self.state = ServiceState::Error;
        self.failure = Some(failure);
        self.pending = None;
        ctx.bag.set_state(&self.name, ProducerState::Failed);
        ctx.hooks.service(&self.name, Action::Error, &message);
    }

    fn set_state(&mut self, state: ServiceState, ctx: &mut StepContext<'_>) {
        debug!(service = %self.name, from = %self.state, to = %state, "Service state change");
        self.state = state;
        ctx.hooks.service(&self.name, Action::Transition, state.as_str());
    }

    fn teardown(&mut self, ctx: &mut StepContext<'_>) {
        if let Some(instance) = self.instance.clone() {
            if let Err(e) = ctx.provisioner.terminate(&instance) {
                self.fail_shutdown(format!("terminate {}: {}", instance, e), ctx);
                return;
            }
            self.instance = None;
        }
        self.shutdown = ShutdownState::Terminated;
        info!(service = %self.name, "Service terminated");
        ctx.hooks
            .service(&self.name, Action::Complete, ShutdownState::Terminated.as_str());
    }

    fn fail_shutdown(&mut self, cause: String, ctx: &mut StepContext<'_>) {
        let message = ServiceFailure::new(FailedStep::Shutdown, cause.clone()).to_string();
        warn!(service = %self.name, cause = %cause, "Shutdown failed");
        self.shutdown = ShutdownState::Failed;
        self.shutdown_failure = Some(cause);
        self.shutdown_task = None;
        ctx.hooks.service(&self.name, Action::Error, &message);
    }
}

fn describe_exit(outcome: &ScriptOutcome) -> String {
    let status = match outcome.exit_code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };
    let stderr = outcome.stderr.trim();
    if stderr.is_empty() {
        status
    } else {
        let last = stderr.lines().last().unwrap_or(stderr);
        format!("{}: {}", status, last)
    }
}

/// Output documents must be JSON objects; an absent document means no outputs.
fn parse_output(raw: Option<&str>) -> Result<Attributes, String> {
    let Some(raw) = raw else {
        return Ok(Attributes::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(other) => Err(format!(
            "output document must be a JSON object, got {}",
            json_kind(&other)
        )),
        Err(e) => Err(format!("invalid output document: {}", e)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
