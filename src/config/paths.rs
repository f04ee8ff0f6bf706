//! Platform default locations, resolved with `directories`.

use std::path::PathBuf;

/// Per-user data directory, e.g. `~/.local/share/cloudboot` on Linux.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "cloudboot")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".cloudboot"))
}

pub fn default_db_path() -> PathBuf {
    data_dir().join("plans.db")
}

pub fn default_work_dir() -> PathBuf {
    data_dir().join("work")
}

pub fn default_log_file() -> PathBuf {
    data_dir().join("cloudboot.log")
}
