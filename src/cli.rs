//! CLI domain: parse, route, output, and presentation only.
//! Orchestration lives in the library; the route table only drives it.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{
    format_errors_text, format_plan_json, format_plan_text, format_run_list_text, PlanReport,
};
pub use route::RunContext;
