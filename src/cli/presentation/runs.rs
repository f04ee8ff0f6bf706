use super::shared::{colored_plan_status, format_section_heading, format_timestamp};
use crate::store::RunSummary;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;

pub fn format_run_list_text(runs: &[RunSummary]) -> String {
    if runs.is_empty() {
        return "No stored runs.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Run", "Status", "Levels", "Services", "Failed", "Updated"]);
    for run in runs {
        table.add_row(vec![
            run.run_id.to_string(),
            colored_plan_status(run.status),
            run.levels.to_string(),
            run.services.to_string(),
            run.failed.to_string(),
            format_timestamp(run.updated_at_ms),
        ]);
    }
    format!("{}\n\n{}", format_section_heading("Runs"), table)
}
