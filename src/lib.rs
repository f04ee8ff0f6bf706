//! Cloudboot: Level-Ordered Boot Plans
//!
//! Boots groups of services on provisioned instances or existing hosts. A plan
//! is an ordered list of levels; every service in a level must be ready before
//! the next level starts, and a service's outputs become configuration inputs
//! for services in later levels.
//!
//! The engine is caller-driven: [`CloudBoot::start`] never blocks and each
//! [`CloudBoot::poll`] advances the plan by at most one step.

pub mod attributes;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod level;
pub mod logging;
pub mod plan;
pub mod registry;
pub mod remote;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;

pub use driver::CloudBoot;
pub use error::{BootError, ErrorKind, StorageError};
pub use hooks::BootHooks;
pub use plan::PlanDescriptor;
pub use remote::Backends;
pub use scheduler::SchedulerConfig;
pub use store::{PlanStore, SledPlanStore};
pub use types::{Action, PlanStatus, RunId, ServiceName};
