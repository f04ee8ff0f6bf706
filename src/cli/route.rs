//! CLI route: single route table and run context. Drives the library and
//! hands results to presentation.

use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_errors_text, format_plan_json, format_plan_text, format_run_list_text, PlanReport,
};
use crate::config::{BootSettings, ConfigLoader};
use crate::driver::CloudBoot;
use crate::error::BootError;
use crate::hooks::BootHooks;
use crate::plan::PlanDescriptor;
use crate::remote::{Backends, LocalExecutor, UnsupportedProvisioner};
use crate::scheduler::SchedulerConfig;
use crate::store::{PlanStore, SledPlanStore};
use crate::types::{PlanStatus, RunId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Runtime context for CLI execution: settings and the opened plan store.
/// Built from an optional config path using ConfigLoader only.
pub struct RunContext {
    settings: BootSettings,
    store: Arc<SledPlanStore>,
}

impl RunContext {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, BootError> {
        let settings = ConfigLoader::load(config_path.as_deref())?;
        Self::with_settings(settings)
    }

    /// Context over already-loaded settings.
    pub fn with_settings(settings: BootSettings) -> Result<Self, BootError> {
        let store = Arc::new(SledPlanStore::open(&settings.storage.db_path)?);
        Ok(Self { settings, store })
    }

    pub fn execute(&self, command: &Commands) -> Result<String, BootError> {
        let started = Instant::now();
        let result = self.execute_inner(command);
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(command = command.name(), duration_ms, "Command finished"),
            Err(e) => warn!(command = command.name(), duration_ms, error = %e, "Command failed"),
        }
        result
    }

    fn execute_inner(&self, command: &Commands) -> Result<String, BootError> {
        match command {
            Commands::Boot { plan, run_name } => self.handle_boot(plan, run_name.as_deref()),
            Commands::Resume { run } => {
                let mut boot = self.reload(run)?;
                self.drive(&mut boot)
            }
            Commands::Status { run, format } => {
                let boot = self.reload(run)?;
                let report = PlanReport::from_boot(&boot);
                if format == "json" {
                    format_plan_json(&report)
                } else {
                    Ok(format_plan_text(&report))
                }
            }
            Commands::Errors { run } => {
                let boot = self.reload(run)?;
                Ok(format_errors_text(boot.run_id(), &boot.error_status()))
            }
            Commands::Restart { run, service } => {
                let mut boot = self.reload(run)?;
                boot.restart_service(service)?;
                self.drive(&mut boot)
            }
            Commands::Terminate { run, force } => {
                let mut boot = self.reload(run)?;
                boot.shutdown(*force)?;
                boot.block_until_shutdown(self.settings.runtime.poll_interval())?;
                Ok(format_plan_text(&PlanReport::from_boot(&boot)))
            }
            Commands::List => {
                let runs = self.store.list_runs()?;
                Ok(format_run_list_text(&runs))
            }
            Commands::Delete { run } => {
                let run_id = RunId::new(run)?;
                if self.store.delete(&run_id)? {
                    Ok(format!("Deleted run {}", run_id))
                } else {
                    Err(BootError::usage(format!("No stored run named {}", run_id)))
                }
            }
        }
    }

    fn handle_boot(&self, plan: &Path, run_name: Option<&str>) -> Result<String, BootError> {
        let descriptor = PlanDescriptor::from_file(plan)?;
        let run_id = run_name.map(RunId::new).transpose()?;
        let mut boot = CloudBoot::from_config(
            &descriptor,
            run_id,
            self.backends(),
            self.plan_store(),
            self.scheduler_config(),
        )?;
        eprintln!("Run {}", boot.run_id());
        self.drive(&mut boot)
    }

    fn reload(&self, run: &str) -> Result<CloudBoot, BootError> {
        let run_id = RunId::new(run)?;
        CloudBoot::from_store(
            &run_id,
            self.backends(),
            self.plan_store(),
            self.scheduler_config(),
        )
    }

    /// Start (or resume) and poll until the plan resolves. A failed plan
    /// comes back as the first failed service's error.
    fn drive(&self, boot: &mut CloudBoot) -> Result<String, BootError> {
        boot.start();
        let status = boot.block_until_complete(self.settings.runtime.poll_interval())?;
        if status == PlanStatus::Error {
            eprintln!(
                "{}",
                format_errors_text(boot.run_id(), &boot.error_status())
            );
            if let Some(err) = boot.error_status().iter().flatten().find_map(|v| v.to_error()) {
                return Err(err);
            }
        }
        Ok(format_plan_text(&PlanReport::from_boot(boot)))
    }

    fn backends(&self) -> Backends {
        Backends::new(
            Box::new(UnsupportedProvisioner),
            Box::new(LocalExecutor::new(self.settings.runtime.work_dir.clone())),
        )
    }

    fn plan_store(&self) -> Arc<dyn PlanStore> {
        self.store.clone()
    }

    /// Progress lines on stderr, so stdout carries only the final report.
    fn scheduler_config(&self) -> SchedulerConfig {
        let hooks = BootHooks::new()
            .on_level(|_, action, level| eprintln!("level {}: {}", level, action))
            .on_service(|service, action, message| {
                eprintln!("  {} {}: {}", service, action, message)
            });
        SchedulerConfig::default().with_hooks(hooks)
    }
}
