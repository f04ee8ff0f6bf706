//! CLI output: error mapping from engine errors to the CLI surface.

use crate::error::BootError;

/// Map engine errors to a string for CLI output.
pub fn map_error(e: &BootError) -> String {
    e.to_string()
}
