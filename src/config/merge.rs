//! Merge rules: built-in defaults, then file sources, then environment.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};

use super::paths;

pub const ENV_PREFIX: &str = "CLOUDBOOT";

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default(
            "storage.db_path",
            paths::default_db_path().to_string_lossy().into_owned(),
        )?
        .set_default(
            "runtime.work_dir",
            paths::default_work_dir().to_string_lossy().into_owned(),
        )?
        .set_default("runtime.poll_interval_ms", 1000)
}

/// `CLOUDBOOT_RUNTIME__POLL_INTERVAL_MS=250` overrides `runtime.poll_interval_ms`.
pub fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}
