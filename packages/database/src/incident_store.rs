//! `DuckDB`-backed incident history.
//!
//! Timestamps are stored as RFC 3339 text in UTC so they round-trip
//! exactly regardless of the session time zone.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use duckdb::{Connection, ToSql};
use hazard_map_analytics::{BoxError, IncidentSource};
use hazard_map_incident_models::{IncidentPayload, IncidentRecord, WeatherSnapshot};
use hazard_map_spatial::{haversine_distance_m, radius_to_degree_box};
use serde::Deserialize;

use crate::DbError;

const SELECT_COLUMNS: &str = "SELECT id, latitude, longitude, category, severity, occurred_at,
        temperature, humidity, wind_speed, population_density
     FROM incidents";

/// Outcome of a JSON import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Records written to the store.
    pub imported: u64,
    /// Records rejected by validation.
    pub skipped: u64,
}

/// Accepted import file shapes: a bare array or `{"incidents": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    List(Vec<IncidentPayload>),
    Wrapped { incidents: Vec<IncidentPayload> },
}

/// Incident history stored in a `DuckDB` database.
///
/// `duckdb::Connection` is `Send` but not `Sync`, so the connection is
/// wrapped in a `Mutex`.
pub struct DuckDbIncidentStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for DuckDbIncidentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbIncidentStore").finish_non_exhaustive()
    }
}

impl DuckDbIncidentStore {
    /// Opens (or creates) the store at `path` and ensures the schema
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        create_schema(&conn)?;
        log::debug!("Opened incident store at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a throwaway in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts incidents, replacing any existing rows with the same id.
    ///
    /// Within one batch the last occurrence of an id wins. Returns the
    /// number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any database operation fails.
    pub fn insert_incidents(&self, incidents: &[IncidentRecord]) -> Result<u64, DbError> {
        if incidents.is_empty() {
            return Ok(0);
        }

        let mut last_seen: BTreeMap<&str, usize> = BTreeMap::new();
        for (i, incident) in incidents.iter().enumerate() {
            last_seen.insert(incident.id(), i);
        }
        let deduped: Vec<&IncidentRecord> = incidents
            .iter()
            .enumerate()
            .filter(|(i, inc)| last_seen.get(inc.id()) == Some(i))
            .map(|(_, inc)| inc)
            .collect();

        if deduped.len() < incidents.len() {
            log::info!(
                "Deduplicated INSERT batch: {} -> {} rows ({} duplicates removed)",
                incidents.len(),
                deduped.len(),
                incidents.len() - deduped.len(),
            );
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "INSERT OR REPLACE INTO incidents (
                id, latitude, longitude, category, severity, occurred_at,
                temperature, humidity, wind_speed, population_density
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;

        let mut written = 0u64;
        for incident in deduped {
            let weather = incident.weather().copied().unwrap_or_default();
            written += stmt.execute(duckdb::params![
                incident.id(),
                incident.latitude(),
                incident.longitude(),
                incident.category().to_string(),
                i64::from(incident.severity()),
                incident.timestamp().to_rfc3339(),
                weather.temperature,
                weather.humidity,
                weather.wind_speed,
                incident.population_density(),
            ])? as u64;
        }

        log::debug!("Wrote {written} incidents");
        Ok(written)
    }

    /// Number of stored incidents.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn count(&self) -> Result<u64, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM incidents")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        u64::try_from(count).map_err(|e| DbError::Conversion {
            message: format!("negative row count {count}: {e}"),
        })
    }

    /// Every stored incident, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a stored row no longer
    /// passes validation.
    pub fn all_incidents(&self) -> Result<Vec<IncidentRecord>, DbError> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY id"), &[])
    }

    /// Incidents within `radius_m` meters of a point, nearest first.
    ///
    /// A degree bounding box narrows the scan in SQL; the exact
    /// great-circle check runs on the candidates.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a stored row no longer
    /// passes validation.
    pub fn incidents_near(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
    ) -> Result<Vec<IncidentRecord>, DbError> {
        let (d_lat, d_lng) = radius_to_degree_box(lat, radius_m);
        let (lat_min, lat_max) = (lat - d_lat, lat + d_lat);

        // Boxes that wrap the antimeridian fall back to a latitude-only scan.
        let (lng_min, lng_max) = if lng - d_lng < -180.0 || lng + d_lng > 180.0 {
            (-180.0, 180.0)
        } else {
            (lng - d_lng, lng + d_lng)
        };

        let candidates = self.query(
            &format!(
                "{SELECT_COLUMNS}
                 WHERE latitude BETWEEN ? AND ?
                   AND longitude BETWEEN ? AND ?"
            ),
            &[&lat_min, &lat_max, &lng_min, &lng_max],
        )?;

        let mut nearby: Vec<(f64, IncidentRecord)> = candidates
            .into_iter()
            .map(|inc| {
                (
                    haversine_distance_m(lat, lng, inc.latitude(), inc.longitude()),
                    inc,
                )
            })
            .filter(|(distance, _)| *distance <= radius_m)
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id().cmp(b.1.id())));

        Ok(nearby.into_iter().map(|(_, inc)| inc).collect())
    }

    /// Imports incidents from a JSON file.
    ///
    /// See [`read_incidents_json`] for the accepted shapes. Entries that
    /// fail validation are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file cannot be read or parsed, or the
    /// insert fails.
    pub fn import_json(&self, path: &Path) -> Result<ImportSummary, DbError> {
        let (records, skipped) = read_incidents_json(path)?;

        let imported = self.insert_incidents(&records)?;
        log::info!(
            "Imported {imported} incidents from {} ({skipped} skipped)",
            path.display()
        );

        Ok(ImportSummary { imported, skipped })
    }

    fn query(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<IncidentRecord>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            let temperature: Option<f64> = row.get(6)?;
            let humidity: Option<f64> = row.get(7)?;
            let wind_speed: Option<f64> = row.get(8)?;
            let weather = (temperature.is_some() || humidity.is_some() || wind_speed.is_some())
                .then_some(WeatherSnapshot {
                    temperature,
                    humidity,
                    wind_speed,
                });

            Ok(IncidentPayload {
                id: row.get(0)?,
                latitude: row.get(1)?,
                longitude: row.get(2)?,
                category: row.get(3)?,
                severity: row.get(4)?,
                timestamp: row.get(5)?,
                weather,
                population_density: row.get(9)?,
            })
        })?;

        let mut incidents = Vec::new();
        for payload in rows {
            let payload = payload?;
            let id = payload.id.clone();
            let record = IncidentRecord::try_from(payload).map_err(|e| DbError::Conversion {
                message: format!("stored incident {id:?} is invalid: {e}"),
            })?;
            incidents.push(record);
        }

        Ok(incidents)
    }
}

impl IncidentSource for DuckDbIncidentStore {
    fn fetch_all(&self) -> Result<Vec<IncidentRecord>, BoxError> {
        Ok(self.all_incidents()?)
    }

    fn fetch_near(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
    ) -> Result<Vec<IncidentRecord>, BoxError> {
        Ok(self.incidents_near(lat, lng, radius_m)?)
    }
}

/// Reads incidents from a JSON file holding a bare array of incidents
/// or an object with an `incidents` array.
///
/// Entries that fail validation are logged and skipped; returns the valid
/// records and the number skipped.
///
/// # Errors
///
/// Returns [`DbError`] if the file cannot be read or is not valid JSON of
/// either shape.
pub fn read_incidents_json(path: &Path) -> Result<(Vec<IncidentRecord>, u64), DbError> {
    let contents = std::fs::read_to_string(path)?;
    let payloads = match serde_json::from_str::<ImportFile>(&contents)? {
        ImportFile::List(payloads) | ImportFile::Wrapped {
            incidents: payloads,
        } => payloads,
    };

    let mut records = Vec::with_capacity(payloads.len());
    let mut skipped = 0u64;
    for payload in payloads {
        let id = payload.id.clone();
        match IncidentRecord::try_from(payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                log::warn!("Skipping invalid incident {id:?}: {e}");
                skipped += 1;
            }
        }
    }

    Ok((records, skipped))
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS incidents (
            id TEXT NOT NULL PRIMARY KEY,
            latitude DOUBLE NOT NULL,
            longitude DOUBLE NOT NULL,
            category TEXT NOT NULL,
            severity BIGINT NOT NULL,
            occurred_at TEXT NOT NULL,
            temperature DOUBLE,
            humidity DOUBLE,
            wind_speed DOUBLE,
            population_density DOUBLE
        );

        CREATE INDEX IF NOT EXISTS idx_incidents_lat_lng
            ON incidents (latitude, longitude);",
    )?;

    Ok(())
}
