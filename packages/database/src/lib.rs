#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `DuckDB` incident storage for the hazard map.
//!
//! Incidents live in a single `DuckDB` file (by default
//! `data/shared/incidents.duckdb`). [`DuckDbIncidentStore`] implements
//! the analytics engine's
//! [`IncidentSource`](hazard_map_analytics::IncidentSource), so the same
//! store backs both the server and the CLI.

pub mod incident_store;
pub mod paths;

pub use incident_store::{DuckDbIncidentStore, ImportSummary, read_incidents_json};

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` query error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed import file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
