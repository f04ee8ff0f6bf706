//! Configuration System
//!
//! Layered settings for the `cloudboot` binary and embedders: built-in
//! defaults, the global config file, an optional explicit file, then
//! `CLOUDBOOT_*` environment variables.

use crate::error::BootError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod merge;
pub mod paths;
mod sources;

pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootSettings {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Sled database holding plan snapshots
    #[serde(default = "paths::default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: paths::default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Base directory for per-step script work directories
    #[serde(default = "paths::default_work_dir")]
    pub work_dir: PathBuf,

    /// Sleep between polls in blocking loops
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            work_dir: paths::default_work_dir(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl RuntimeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Storage(String),
    Runtime(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Runtime(msg) => write!(f, "Runtime: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl BootSettings {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.storage.db_path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Database path cannot be empty".to_string(),
            ));
        }
        if self.runtime.work_dir.as_os_str().is_empty() {
            errors.push(ValidationError::Runtime(
                "Work directory cannot be empty".to_string(),
            ));
        }
        if self.runtime.poll_interval_ms == 0 {
            errors.push(ValidationError::Runtime(
                "Poll interval must be greater than zero".to_string(),
            ));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads [`BootSettings`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, `explicit` (if given), environment.
    pub fn load(explicit: Option<&Path>) -> Result<BootSettings, BootError> {
        let mut builder = merge::builder_with_defaults()?;
        builder = sources::global_file::add_to_builder(builder)?;
        if let Some(path) = explicit {
            builder = sources::explicit_file::add_to_builder(builder, path)?;
        }
        builder = merge::add_environment(builder);
        let settings: BootSettings = builder.build()?.try_deserialize()?;
        Self::checked(settings)
    }

    fn checked(settings: BootSettings) -> Result<BootSettings, BootError> {
        settings.validate().map_err(|errors| {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            BootError::config(format!("Invalid configuration: {}", joined))
        })?;
        Ok(settings)
    }
}
