//! CLI presentation: text and json formatters per command family.

mod plan;
mod runs;
mod shared;

pub use plan::{format_errors_text, format_plan_json, format_plan_text, PlanReport};
pub use runs::format_run_list_text;
