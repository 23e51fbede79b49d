#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the data directory.
//!
//! All paths are relative to the project root's `data/` directory.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`; falls back to the
/// current directory if the manifest is not nested as expected.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the `data/shared/` directory for shared databases.
#[must_use]
pub fn shared_dir() -> PathBuf {
    data_dir().join("shared")
}

/// Returns the path for the incidents `DuckDB` file.
#[must_use]
pub fn incidents_db_path() -> PathBuf {
    shared_dir().join("incidents.duckdb")
}

/// Returns the `data/models/` directory for trained model artifacts.
#[must_use]
pub fn model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
