//! Plan presentation: per-level service tables and the error listing.

use super::shared::{colored_level_status, colored_plan_status, colored_state, format_section_heading};
use crate::driver::CloudBoot;
use crate::error::BootError;
use crate::level::LevelStatus;
use crate::service::{ServiceView, ShutdownState};
use crate::types::{PlanStatus, RunId};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;

/// Everything `status` shows, in a form that serializes for `--format json`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub run_id: RunId,
    pub status: PlanStatus,
    pub current_level: usize,
    pub levels: Vec<LevelReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelReport {
    pub index: usize,
    pub status: LevelStatus,
    pub services: Vec<ServiceView>,
}

impl PlanReport {
    pub fn from_boot(boot: &CloudBoot) -> Self {
        let levels = boot
            .get_services()
            .into_iter()
            .enumerate()
            .map(|(index, services)| LevelReport {
                index,
                status: boot.level_status(index).unwrap_or(LevelStatus::Pending),
                services,
            })
            .collect();
        Self {
            run_id: boot.run_id().clone(),
            status: boot.status(),
            current_level: boot.current_level(),
            levels,
        }
    }
}

pub fn format_plan_json(report: &PlanReport) -> Result<String, BootError> {
    serde_json::to_string_pretty(report)
        .map_err(|e| BootError::usage(format!("Failed to render status: {}", e)))
}

pub fn format_plan_text(report: &PlanReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading(&format!("Run {}", report.run_id))
    ));
    out.push_str(&format!(
        "  Status: {}\n  Current level: {}\n\n",
        colored_plan_status(report.status),
        report.current_level
    ));
    for level in &report.levels {
        out.push_str(&format!(
            "Level {} ({})\n",
            level.index,
            colored_level_status(level.status)
        ));
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Service", "Target", "State", "Host", "Message"]);
        for view in &level.services {
            table.add_row(vec![
                view.name.to_string(),
                view.target.clone(),
                colored_state(view.state),
                view.host.clone().unwrap_or_else(|| "-".to_string()),
                row_message(view),
            ]);
        }
        out.push_str(&format!("{}\n\n", table));
    }
    out.trim_end().to_string()
}

/// Failed services per level, as returned by `error_status`.
pub fn format_errors_text(run_id: &RunId, errors: &[Vec<ServiceView>]) -> String {
    let failed: Vec<&ServiceView> = errors.iter().flatten().collect();
    if failed.is_empty() {
        return format!("Run {} has no failed services.", run_id);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Level", "Service", "Error"]);
    for view in &failed {
        table.add_row(vec![view.level.to_string(), view.name.to_string(), view.message()]);
    }
    format!(
        "{}\n\n{}",
        format_section_heading(&format!("Run {}: {} failed", run_id, failed.len())),
        table
    )
}

fn row_message(view: &ServiceView) -> String {
    if let Some(ref shutdown_failure) = view.shutdown_failure {
        return format!("shutdown failed: {}", shutdown_failure);
    }
    match &view.failure {
        Some(failure) => failure.to_string(),
        None if view.shutdown != ShutdownState::Active => view.shutdown.as_str().to_string(),
        None => String::new(),
    }
}
