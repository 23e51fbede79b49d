#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the hazard map server.
//!
//! These are the JSON envelopes of the REST API. Incidents arrive as raw
//! [`IncidentPayload`]s so the server can report exactly which entry
//! failed validation.

use chrono::{DateTime, Utc};
use hazard_map_analytics_models::{AnomalyFinding, ClusterSummary, RegionBounds, RiskPrediction};
use hazard_map_incident_models::IncidentPayload;
use serde::{Deserialize, Serialize};

/// Response of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Always `"healthy"` when the server answers.
    pub status: String,
    /// Server time of the response.
    pub timestamp: DateTime<Utc>,
    /// Version of the active anomaly model, if one is loaded.
    pub model_version: Option<u64>,
    /// Server package version.
    pub version: String,
}

/// A batch of incidents to analyze.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentBatch {
    /// Incidents in caller order.
    #[serde(default)]
    pub incidents: Vec<IncidentPayload>,
}

/// Response of `POST /api/detect-anomalies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomaliesResponse {
    /// Incidents flagged as anomalous, in input order.
    pub anomalies: Vec<AnomalyFinding>,
}

/// Body of `POST /api/predict-risk-zones`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskZonesRequest {
    /// Region to scan.
    #[serde(alias = "region_bounds")]
    pub region_bounds: RegionBounds,
}

/// Response of `POST /api/predict-risk-zones`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskZonesResponse {
    /// Grid points above the reporting threshold.
    pub predictions: Vec<RiskPrediction>,
}

/// Response of `POST /api/cluster-incidents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClustersResponse {
    /// Hotspots, ordered by cluster label.
    pub clusters: Vec<ClusterSummary>,
}

/// Response of `POST /api/retrain-models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrainResponse {
    /// Human-readable outcome.
    pub message: String,
    /// Whether a new model was published.
    pub trained: bool,
    /// Version of the active model after the call, if any.
    pub version: Option<u64>,
    /// Incidents available for training.
    pub sample_count: usize,
}

/// Error body returned with 4xx and 5xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Description of the failure.
    pub error: String,
}

impl ApiError {
    /// Creates an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_zone_request_accepts_snake_case_key() {
        let req: RiskZonesRequest = serde_json::from_str(
            r#"{"region_bounds":{"lat_min":35,"lat_max":37,"lng_min":2,"lng_max":4}}"#,
        )
        .unwrap();
        assert_eq!(req.region_bounds, RegionBounds::new(35.0, 37.0, 2.0, 4.0));
    }

    #[test]
    fn batch_defaults_to_empty() {
        let batch: IncidentBatch = serde_json::from_str("{}").unwrap();
        assert!(batch.incidents.is_empty());
    }

    #[test]
    fn health_serializes_camel_case() {
        let health = ApiHealth {
            status: "healthy".to_string(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            model_version: None,
            version: "0.1.0".to_string(),
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "healthy");
        assert!(json["modelVersion"].is_null());
    }
}
