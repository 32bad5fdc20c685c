//! Centralized path utilities
//!
//! All runtime paths in one place for consistency

use std::path::PathBuf;

use crate::constants::CONFIG_DIR_NAME;

/// Get the ensemble config directory (~/.ensemble)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the per-run log directory (~/.ensemble/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Get the workflow trace directory (~/.ensemble/traces)
pub fn traces_dir() -> PathBuf {
    config_dir().join("traces")
}

/// Get the default session store directory (~/.ensemble/sessions)
pub fn sessions_dir() -> PathBuf {
    config_dir().join("sessions")
}

/// Get the skill catalog directory (~/.ensemble/skills)
pub fn skills_dir() -> PathBuf {
    config_dir().join("skills")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(dir: &PathBuf) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
