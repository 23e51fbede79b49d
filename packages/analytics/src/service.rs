//! The hazard analytics facade.
//!
//! [`HazardService`] wires the anomaly model, risk scorer, and hotspot
//! clusterer to a shared incident source. HTTP handlers, the CLI, and the
//! retraining scheduler all go through it.

use std::sync::Arc;

use hazard_map_analytics_models::{
    AnomalyFinding, AnomalyLabel, ClusterSummary, RegionBounds, RiskPrediction,
};
use hazard_map_incident_models::IncidentRecord;
use hazard_map_spatial::{PopulationDensityEstimator, SpatialClusterer};

use crate::clock::Clock;
use crate::features::FeatureEncoder;
use crate::forest::IsolationForestParams;
use crate::model::{AnomalyModel, TrainOutcome, anomaly_reasons};
use crate::risk::RiskScorer;
use crate::source::IncidentSource;
use crate::store::ModelStore;
use crate::AnalyticsError;

/// Entry point for every analytics operation.
pub struct HazardService {
    source: Arc<dyn IncidentSource>,
    model: AnomalyModel,
    scorer: RiskScorer,
    clusterer: SpatialClusterer,
}

impl std::fmt::Debug for HazardService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardService")
            .field("model", &self.model)
            .field("clusterer", &self.clusterer)
            .finish_non_exhaustive()
    }
}

impl HazardService {
    /// Builds a service and restores any persisted anomaly model from
    /// `store`.
    #[must_use]
    pub fn new(
        source: Arc<dyn IncidentSource>,
        store: Arc<dyn ModelStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_params(source, store, clock, IsolationForestParams::default())
    }

    /// Like [`Self::new`] with custom forest parameters.
    #[must_use]
    pub fn with_params(
        source: Arc<dyn IncidentSource>,
        store: Arc<dyn ModelStore>,
        clock: Arc<dyn Clock>,
        params: IsolationForestParams,
    ) -> Self {
        let density = PopulationDensityEstimator::new();
        Self {
            model: AnomalyModel::load(store, FeatureEncoder::new(density), params),
            scorer: RiskScorer::new(source.clone(), clock, density),
            clusterer: SpatialClusterer::new(),
            source,
        }
    }

    /// The anomaly model, for introspection.
    #[must_use]
    pub const fn model(&self) -> &AnomalyModel {
        &self.model
    }

    /// Returns the incidents the model flags as anomalous, with
    /// explanations, in input order.
    ///
    /// Returns an empty list while the model is untrained.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Model`] if the trained model cannot be
    /// applied.
    pub fn detect_anomalies(
        &self,
        incidents: &[IncidentRecord],
    ) -> Result<Vec<AnomalyFinding>, AnalyticsError> {
        if !self.model.is_trained() {
            log::debug!("Anomaly model not trained; returning no findings");
        }

        let findings: Vec<AnomalyFinding> = self
            .model
            .predict(incidents)
            .inspect_err(|e| log::error!("Anomaly detection failed: {e}"))?
            .into_iter()
            .filter(|p| p.label == AnomalyLabel::Anomalous)
            .map(|p| AnomalyFinding {
                incident_id: p.incident.id().to_string(),
                latitude: p.incident.latitude(),
                longitude: p.incident.longitude(),
                category: p.incident.category(),
                severity: p.incident.severity(),
                anomaly_score: p.score,
                timestamp: p.incident.timestamp().to_rfc3339(),
                reasons: anomaly_reasons(p.incident, self.model.density()),
            })
            .collect();

        log::debug!(
            "Flagged {} of {} incidents as anomalous",
            findings.len(),
            incidents.len()
        );

        Ok(findings)
    }

    /// Scores a grid over `bounds` and returns the points above the zone
    /// threshold.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Source`] if the incident history cannot
    /// be queried.
    pub fn predict_risk_zones(
        &self,
        bounds: &RegionBounds,
    ) -> Result<Vec<RiskPrediction>, AnalyticsError> {
        self.scorer
            .predict_risk_zones(bounds)
            .inspect_err(|e| log::error!("Risk zone prediction failed: {e}"))
    }

    /// Risk score for a single point.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Source`] if the incident history cannot
    /// be queried.
    pub fn risk_score(&self, lat: f64, lng: f64) -> Result<f64, AnalyticsError> {
        self.scorer.score(lat, lng)
    }

    /// Groups the given incidents into hotspots.
    #[must_use]
    pub fn cluster_incidents(&self, incidents: &[IncidentRecord]) -> Vec<ClusterSummary> {
        self.clusterer.cluster(incidents)
    }

    /// Retrains the anomaly model on the full incident history.
    ///
    /// Blocking; async callers should go through
    /// [`crate::retrain_in_background`].
    ///
    /// # Errors
    ///
    /// * [`AnalyticsError::Source`] if the history cannot be read
    /// * [`AnalyticsError::Model`] if fitting fails
    /// * [`AnalyticsError::Store`] if the new model cannot be persisted
    pub fn retrain(&self) -> Result<TrainOutcome, AnalyticsError> {
        let incidents = self.source.fetch_all().map_err(|e| {
            log::error!("Failed to load incident history for training: {e}");
            AnalyticsError::Source(e)
        })?;

        self.model.train(&incidents)
    }
}
