#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Disaster incident taxonomy and validated incident records.
//!
//! This crate defines the closed set of incident categories used across
//! the hazard-map system, and the [`IncidentRecord`] type that every
//! analytics component consumes. Raw inbound data arrives as an
//! [`IncidentPayload`] and is validated exactly once when it is converted
//! into an [`IncidentRecord`], so the analytics code never has to deal with
//! out-of-range coordinates or unparseable timestamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Top-level incident categories.
///
/// The numeric discriminants are the stable feature encoding used by the
/// anomaly model. They are fixed and must never be reordered.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum IncidentCategory {
    /// Seismic events
    Earthquake = 1,
    /// River, coastal, and flash flooding
    Flood = 2,
    /// Urban and wildland fires
    Fire = 3,
    /// Wind storms, sandstorms, heavy rain
    Storm = 4,
    /// Landslides and mudslides
    Landslide = 5,
    /// Road and industrial accidents
    Accident = 6,
    /// Infrastructure failures (bridges, power, water)
    Infrastructure = 7,
    /// Public health emergencies
    Health = 8,
    /// Security incidents
    Security = 9,
    /// Anything that does not map to a known category
    #[serde(other)]
    Other = 10,
}

impl IncidentCategory {
    /// Returns the fixed numeric code for this category (1-10).
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parses a category name, falling back to [`Self::Other`] for
    /// anything unrecognized.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        name.trim().parse().unwrap_or(Self::Other)
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Earthquake,
            Self::Flood,
            Self::Fire,
            Self::Storm,
            Self::Landslide,
            Self::Accident,
            Self::Infrastructure,
            Self::Health,
            Self::Security,
            Self::Other,
        ]
    }
}

/// Weather conditions captured alongside an incident.
///
/// Every field is optional; consumers apply their own per-field defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    /// Air temperature in degrees Celsius.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Wind speed.
    #[serde(default)]
    pub wind_speed: Option<f64>,
}

/// Errors raised when raw incident data fails validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidIncidentError {
    /// The incident has no identifier.
    #[error("incident id must not be empty")]
    EmptyId,

    /// Latitude is non-finite or outside `[-90, 90]`.
    #[error("latitude {value} out of range: expected -90 to 90")]
    Latitude {
        /// The rejected value.
        value: f64,
    },

    /// Longitude is non-finite or outside `[-180, 180]`.
    #[error("longitude {value} out of range: expected -180 to 180")]
    Longitude {
        /// The rejected value.
        value: f64,
    },

    /// Severity is zero, negative, or too large to represent.
    #[error("severity {value} is not a positive integer")]
    Severity {
        /// The rejected value.
        value: i64,
    },

    /// The timestamp could not be parsed.
    #[error("invalid timestamp '{value}': expected RFC 3339, YYYY-MM-DDTHH:MM:SS, or YYYY-MM-DD")]
    Timestamp {
        /// The rejected value.
        value: String,
    },

    /// Population density is negative or non-finite.
    #[error("population density {value} must be finite and non-negative")]
    PopulationDensity {
        /// The rejected value.
        value: f64,
    },
}

/// A validated disaster incident.
///
/// Coordinates are WGS84 and guaranteed in range; severity is a positive
/// integer. Fields are read-only once the record is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "IncidentPayload")]
pub struct IncidentRecord {
    id: String,
    latitude: f64,
    longitude: f64,
    category: IncidentCategory,
    severity: u8,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weather: Option<WeatherSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    population_density: Option<f64>,
}

impl IncidentRecord {
    /// Builds a record, validating identity, coordinates, and severity.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIncidentError`] if the id is empty, either
    /// coordinate is out of range, or severity is zero.
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        category: IncidentCategory,
        severity: u8,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, InvalidIncidentError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(InvalidIncidentError::EmptyId);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(InvalidIncidentError::Latitude { value: latitude });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(InvalidIncidentError::Longitude { value: longitude });
        }
        if severity == 0 {
            return Err(InvalidIncidentError::Severity { value: 0 });
        }

        Ok(Self {
            id,
            latitude,
            longitude,
            category,
            severity,
            timestamp,
            weather: None,
            population_density: None,
        })
    }

    /// Attaches a weather snapshot.
    #[must_use]
    pub fn with_weather(mut self, weather: WeatherSnapshot) -> Self {
        self.weather = Some(weather);
        self
    }

    /// Attaches a pre-computed population density (people/km²).
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIncidentError::PopulationDensity`] if the value is
    /// negative or non-finite.
    pub fn with_population_density(mut self, density: f64) -> Result<Self, InvalidIncidentError> {
        if !density.is_finite() || density < 0.0 {
            return Err(InvalidIncidentError::PopulationDensity { value: density });
        }
        self.population_density = Some(density);
        Ok(self)
    }

    /// Opaque incident identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latitude (WGS84).
    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude (WGS84).
    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Incident category.
    #[must_use]
    pub const fn category(&self) -> IncidentCategory {
        self.category
    }

    /// Severity (positive, typically 1-5).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        self.severity
    }

    /// When the incident was reported (UTC).
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Weather at the time of the incident, if captured.
    #[must_use]
    pub const fn weather(&self) -> Option<&WeatherSnapshot> {
        self.weather.as_ref()
    }

    /// Pre-computed population density, if known.
    #[must_use]
    pub const fn population_density(&self) -> Option<f64> {
        self.population_density
    }
}

/// Raw incident data as received from a request body or import file.
///
/// Converted into an [`IncidentRecord`] via [`TryFrom`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentPayload {
    /// Incident identifier.
    pub id: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Category name; unknown names map to `other`.
    pub category: String,
    /// Severity level.
    pub severity: i64,
    /// Report timestamp (RFC 3339, naive ISO datetime, or date).
    pub timestamp: String,
    /// Optional weather snapshot.
    #[serde(default)]
    pub weather: Option<WeatherSnapshot>,
    /// Optional pre-computed population density.
    #[serde(default)]
    pub population_density: Option<f64>,
}

impl TryFrom<IncidentPayload> for IncidentRecord {
    type Error = InvalidIncidentError;

    fn try_from(payload: IncidentPayload) -> Result<Self, Self::Error> {
        let severity = u8::try_from(payload.severity).map_err(|_| {
            InvalidIncidentError::Severity {
                value: payload.severity,
            }
        })?;
        let timestamp = parse_timestamp(&payload.timestamp)?;

        let mut record = Self::new(
            payload.id,
            payload.latitude,
            payload.longitude,
            IncidentCategory::from_name(&payload.category),
            severity,
            timestamp,
        )?;

        if let Some(weather) = payload.weather {
            record = record.with_weather(weather);
        }
        if let Some(density) = payload.population_density {
            record = record.with_population_density(density)?;
        }

        Ok(record)
    }
}

/// Parses an incident timestamp into UTC.
///
/// Accepts RFC 3339 (`2024-01-01T10:00:00Z`), a naive datetime with an
/// optional fractional part (`2024-01-01T10:00:00`), or a bare date
/// (`2024-01-01`, midnight). Naive values are taken to be UTC.
///
/// # Errors
///
/// Returns [`InvalidIncidentError::Timestamp`] if none of the formats match.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, InvalidIncidentError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| InvalidIncidentError::Timestamp {
            value: s.to_string(),
        })
}
