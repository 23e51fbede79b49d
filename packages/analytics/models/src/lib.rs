#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Result types produced by the hazard analytics engine.
//!
//! Risk predictions, anomaly findings, and hotspot cluster summaries are
//! all ephemeral: they are computed per request and never persisted.

use hazard_map_incident_models::IncidentCategory;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Lower bound (inclusive) of the `critical` tier.
pub const CRITICAL_THRESHOLD: f64 = 0.8;
/// Lower bound (inclusive) of the `high` tier.
pub const HIGH_THRESHOLD: f64 = 0.6;
/// Lower bound (inclusive) of the `medium` tier.
pub const MEDIUM_THRESHOLD: f64 = 0.4;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
}

/// A latitude/longitude bounding region for risk-zone scans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionBounds {
    /// Southern latitude edge.
    #[serde(alias = "lat_min")]
    pub lat_min: f64,
    /// Northern latitude edge.
    #[serde(alias = "lat_max")]
    pub lat_max: f64,
    /// Western longitude edge.
    #[serde(alias = "lng_min")]
    pub lng_min: f64,
    /// Eastern longitude edge.
    #[serde(alias = "lng_max")]
    pub lng_max: f64,
}

impl RegionBounds {
    /// Creates a new region from its four edges.
    #[must_use]
    pub const fn new(lat_min: f64, lat_max: f64, lng_min: f64, lng_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lng_min,
            lng_max,
        }
    }

    /// Returns `true` if every edge is a finite number.
    #[must_use]
    pub const fn is_finite(&self) -> bool {
        self.lat_min.is_finite()
            && self.lat_max.is_finite()
            && self.lng_min.is_finite()
            && self.lng_max.is_finite()
    }
}

/// Risk tier derived from a score in `[0, 1]`.
///
/// Ordered from least to most severe, so `Ord` comparisons follow risk.
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
#[strum(serialize_all = "snake_case")]
pub enum RiskCategory {
    /// Score below 0.4
    Low,
    /// Score in `[0.4, 0.6)`
    Medium,
    /// Score in `[0.6, 0.8)`
    High,
    /// Score of 0.8 or more
    Critical,
}

impl RiskCategory {
    /// Maps a risk score onto its tier using closed lower bounds.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= CRITICAL_THRESHOLD {
            Self::Critical
        } else if score >= HIGH_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Risk assessment for a single grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskPrediction {
    /// Latitude of the grid point.
    pub latitude: f64,
    /// Longitude of the grid point.
    pub longitude: f64,
    /// Risk score in `[0, 1]`.
    pub risk_level: f64,
    /// Tier derived from `risk_level`.
    pub risk_category: RiskCategory,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Human-readable contributing factors.
    pub factors: Vec<String>,
}

/// Binary outcome of the outlier model for one incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyLabel {
    /// The incident falls outside the learned distribution.
    Anomalous,
    /// The incident fits the learned distribution.
    Normal,
}

/// An incident flagged as anomalous by the outlier model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyFinding {
    /// Identifier of the flagged incident.
    pub incident_id: String,
    /// Incident latitude.
    pub latitude: f64,
    /// Incident longitude.
    pub longitude: f64,
    /// Incident category.
    pub category: IncidentCategory,
    /// Incident severity.
    pub severity: u8,
    /// Decision score; more negative means more anomalous.
    pub anomaly_score: f64,
    /// Incident timestamp (ISO 8601).
    pub timestamp: String,
    /// Rule-based explanations, possibly empty.
    pub reasons: Vec<String>,
}

/// Summary of a density-based incident hotspot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    /// `cluster_<label>`; only stable within one clustering call.
    pub id: String,
    /// Arithmetic mean of member coordinates.
    pub centroid: GeoPoint,
    /// Largest member distance from the centroid, in meters.
    pub radius_meters: f64,
    /// Number of member incidents.
    pub member_count: usize,
    /// Mean severity over members.
    pub mean_severity: f64,
    /// Tier derived from `mean_severity / 5`.
    pub risk_category: RiskCategory,
    /// Member incident ids in input order.
    pub member_ids: Vec<String>,
}
