//! Integration tests for cloudboot plans

mod local_scripts;
mod persistence_reload;
mod shutdown;
