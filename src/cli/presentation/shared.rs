//! Shared presentation helpers: headings and state colouring.

use crate::level::LevelStatus;
use crate::service::ServiceState;
use crate::types::PlanStatus;
use owo_colors::OwoColorize;

pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

pub fn colored_state(state: ServiceState) -> String {
    let label = state.as_str();
    match state {
        ServiceState::Ready => label.green().to_string(),
        ServiceState::Error => label.red().to_string(),
        ServiceState::NotStarted => label.dimmed().to_string(),
        _ => label.yellow().to_string(),
    }
}

pub fn colored_plan_status(status: PlanStatus) -> String {
    let label = status.as_str();
    match status {
        PlanStatus::Complete => label.green().to_string(),
        PlanStatus::Error => label.red().to_string(),
        PlanStatus::Active => label.yellow().to_string(),
        PlanStatus::Pending => label.to_string(),
    }
}

pub fn colored_level_status(status: LevelStatus) -> String {
    let label = status.as_str();
    match status {
        LevelStatus::Complete => label.green().to_string(),
        LevelStatus::Error => label.red().to_string(),
        LevelStatus::Running => label.yellow().to_string(),
        LevelStatus::Pending => label.to_string(),
    }
}

/// Epoch milliseconds as a UTC timestamp.
pub fn format_timestamp(ms: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
