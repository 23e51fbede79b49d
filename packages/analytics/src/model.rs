//! The trainable anomaly model.
//!
//! [`AnomalyModel`] owns the current trained snapshot (scaler plus forest)
//! behind an `Arc` swap. Prediction clones the `Arc` and scores without
//! holding any lock, so it never observes a half-replaced model. Training
//! is serialized by its own mutex and only publishes a new snapshot after
//! the model has been fitted and persisted.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Timelike;
use hazard_map_analytics_models::AnomalyLabel;
use hazard_map_incident_models::IncidentRecord;
use hazard_map_spatial::PopulationDensityEstimator;
use serde::{Deserialize, Serialize};

use crate::features::FeatureEncoder;
use crate::forest::{IsolationForest, IsolationForestParams};
use crate::scaler::StandardScaler;
use crate::store::ModelStore;
use crate::AnalyticsError;

/// Minimum number of incidents required to train.
pub const MIN_TRAINING_INCIDENTS: usize = 10;

/// Severity at or above which an incident is called out as unusual.
const HIGH_SEVERITY: u8 = 4;
/// Hours before this are unusual.
const EARLY_HOUR: u32 = 6;
/// Hours after this are unusual.
const LATE_HOUR: u32 = 22;
/// Estimated densities below this are called out as sparse.
const LOW_DENSITY: f64 = 100.0;

/// A trained scaler and detector pair: the unit of persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    /// Feature standardization fitted on the training set.
    pub scaler: StandardScaler,
    /// Outlier detector fitted on the scaled training set.
    pub detector: IsolationForest,
}

#[derive(Debug)]
struct Snapshot {
    version: u64,
    state: ModelState,
}

/// Result of a training attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    /// A new model was fitted, persisted, and published.
    Trained {
        /// Version of the newly published snapshot.
        version: u64,
        /// Number of incidents the model was fitted on.
        sample_count: usize,
    },
    /// Too few incidents; the previous model (if any) is untouched.
    InsufficientData {
        /// Incidents available.
        available: usize,
        /// Incidents required.
        required: usize,
    },
}

/// A scored incident, in input order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction<'a> {
    /// The scored incident.
    pub incident: &'a IncidentRecord,
    /// Anomalous when `score < 0`.
    pub label: AnomalyLabel,
    /// Offset-adjusted decision score; more negative is more anomalous.
    pub score: f64,
}

/// Isolation-forest anomaly model with atomic snapshot replacement.
pub struct AnomalyModel {
    encoder: FeatureEncoder,
    params: IsolationForestParams,
    store: Arc<dyn ModelStore>,
    current: RwLock<Option<Arc<Snapshot>>>,
    training: Mutex<()>,
}

impl std::fmt::Debug for AnomalyModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyModel")
            .field("params", &self.params)
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl AnomalyModel {
    /// Creates an untrained model that persists to `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ModelStore>,
        encoder: FeatureEncoder,
        params: IsolationForestParams,
    ) -> Self {
        Self {
            encoder,
            params,
            store,
            current: RwLock::new(None),
            training: Mutex::new(()),
        }
    }

    /// Creates a model and restores the last persisted snapshot, if any.
    ///
    /// A missing or unreadable model is logged and leaves the model
    /// untrained; it never fails startup.
    #[must_use]
    pub fn load(
        store: Arc<dyn ModelStore>,
        encoder: FeatureEncoder,
        params: IsolationForestParams,
    ) -> Self {
        let model = Self::new(store, encoder, params);

        match model.store.load() {
            Ok(Some(state)) => {
                log::info!("Loaded persisted anomaly model");
                model.publish(Snapshot { version: 1, state });
            }
            Ok(None) => {
                log::info!("No persisted anomaly model found; starting untrained");
            }
            Err(e) => {
                log::warn!("Failed to load persisted anomaly model, starting untrained: {e}");
            }
        }

        model
    }

    /// Returns `true` once a snapshot has been loaded or trained.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Version of the current snapshot; `0` while untrained.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.snapshot().map_or(0, |s| s.version)
    }

    /// The density estimator shared with the feature encoder.
    #[must_use]
    pub const fn density(&self) -> &PopulationDensityEstimator {
        self.encoder.density()
    }

    fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, snapshot: Snapshot) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(snapshot));
    }

    /// Fits a new model on `incidents`, persists it, and publishes it.
    ///
    /// Concurrent calls run one at a time. Predictions issued while
    /// training is in progress keep using the previous snapshot.
    ///
    /// # Errors
    ///
    /// * [`AnalyticsError::Model`] if fitting fails
    /// * [`AnalyticsError::Store`] if the fitted model cannot be persisted;
    ///   the in-memory model is left unchanged in that case
    pub fn train(&self, incidents: &[IncidentRecord]) -> Result<TrainOutcome, AnalyticsError> {
        let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);

        if incidents.len() < MIN_TRAINING_INCIDENTS {
            log::warn!(
                "Not enough incidents to train anomaly model: {} (need {MIN_TRAINING_INCIDENTS})",
                incidents.len()
            );
            return Ok(TrainOutcome::InsufficientData {
                available: incidents.len(),
                required: MIN_TRAINING_INCIDENTS,
            });
        }

        let rows = self.encoder.encode(incidents);
        let scaler = StandardScaler::fit(&rows)?;
        let scaled = scaler.transform(&rows)?;
        let detector = IsolationForest::fit(&scaled, self.params)?;
        let state = ModelState { scaler, detector };

        self.store.save(&state).map_err(|e| {
            log::error!("Failed to persist trained anomaly model: {e}");
            AnalyticsError::Store(e)
        })?;

        let version = self.version() + 1;
        self.publish(Snapshot { version, state });

        log::info!(
            "Trained anomaly model v{version} on {} incidents",
            incidents.len()
        );

        Ok(TrainOutcome::Trained {
            version,
            sample_count: incidents.len(),
        })
    }

    /// Labels and scores each incident against the current snapshot.
    ///
    /// Returns an empty vector while untrained.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Model`] if the snapshot is incompatible
    /// with the feature encoding.
    pub fn predict<'a>(
        &self,
        incidents: &'a [IncidentRecord],
    ) -> Result<Vec<Prediction<'a>>, AnalyticsError> {
        let Some(snapshot) = self.snapshot() else {
            return Ok(Vec::new());
        };
        if incidents.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.encoder.encode(incidents);
        let scaled = snapshot.state.scaler.transform(&rows)?;
        let scores = snapshot.state.detector.decision_function(&scaled);

        Ok(incidents
            .iter()
            .zip(scores)
            .map(|(incident, score)| Prediction {
                incident,
                label: if score < 0.0 {
                    AnomalyLabel::Anomalous
                } else {
                    AnomalyLabel::Normal
                },
                score,
            })
            .collect())
    }
}

/// Rule-based explanations for why an incident may be anomalous.
///
/// Independent of the model; may be empty.
#[must_use]
pub fn anomaly_reasons(
    incident: &IncidentRecord,
    density: &PopulationDensityEstimator,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if incident.severity() >= HIGH_SEVERITY {
        reasons.push("unusually high severity".to_string());
    }

    let hour = incident.timestamp().hour();
    if !(EARLY_HOUR..=LATE_HOUR).contains(&hour) {
        reasons.push("unusual hour".to_string());
    }

    if density.estimate(incident.latitude(), incident.longitude()) < LOW_DENSITY {
        reasons.push("low-population-density area".to_string());
    }

    reasons
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use hazard_map_incident_models::IncidentCategory;

    use super::*;
    use crate::store::InMemoryModelStore;
    use crate::BoxError;

    struct FailingStore;

    impl ModelStore for FailingStore {
        fn save(&self, _state: &ModelState) -> Result<(), BoxError> {
            Err("disk full".into())
        }

        fn load(&self) -> Result<Option<ModelState>, BoxError> {
            Err("unreadable".into())
        }
    }

    fn incident(id: usize, lat: f64, lng: f64, severity: u8, hour: u32) -> IncidentRecord {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap();
        IncidentRecord::new(
            format!("inc-{id}"),
            lat,
            lng,
            IncidentCategory::Fire,
            severity,
            base + Duration::days(i64::try_from(id % 20).unwrap()),
        )
        .unwrap()
    }

    fn training_set(n: usize) -> Vec<IncidentRecord> {
        (0..n)
            .map(|i| {
                let offset = f64::from(u32::try_from(i % 10).unwrap()) * 0.001;
                incident(i, 36.75 + offset, 3.05 + offset, 2, 12)
            })
            .collect()
    }

    fn model(store: Arc<dyn ModelStore>) -> AnomalyModel {
        AnomalyModel::new(
            store,
            FeatureEncoder::default(),
            IsolationForestParams::default(),
        )
    }

    #[test]
    fn untrained_predicts_nothing() {
        let model = model(Arc::new(InMemoryModelStore::new()));
        assert!(!model.is_trained());
        assert_eq!(model.version(), 0);
        assert!(model.predict(&training_set(5)).unwrap().is_empty());
    }

    #[test]
    fn nine_incidents_is_insufficient() {
        let store = Arc::new(InMemoryModelStore::new());
        let model = model(store.clone());

        let outcome = model.train(&training_set(9)).unwrap();
        assert_eq!(
            outcome,
            TrainOutcome::InsufficientData {
                available: 9,
                required: MIN_TRAINING_INCIDENTS
            }
        );
        assert!(!model.is_trained());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn ten_incidents_trains_and_persists() {
        let store = Arc::new(InMemoryModelStore::new());
        let model = model(store.clone());

        let outcome = model.train(&training_set(10)).unwrap();
        assert_eq!(
            outcome,
            TrainOutcome::Trained {
                version: 1,
                sample_count: 10
            }
        );
        assert!(model.is_trained());
        assert_eq!(store.save_count(), 1);

        let outcome = model.train(&training_set(12)).unwrap();
        assert!(matches!(outcome, TrainOutcome::Trained { version: 2, .. }));
    }

    #[test]
    fn predictions_preserve_input_order() {
        let model = model(Arc::new(InMemoryModelStore::new()));
        let incidents = training_set(40);
        model.train(&incidents).unwrap();

        let predictions = model.predict(&incidents).unwrap();
        assert_eq!(predictions.len(), incidents.len());
        for (prediction, incident) in predictions.iter().zip(&incidents) {
            assert_eq!(prediction.incident.id(), incident.id());
            assert_eq!(
                prediction.label == AnomalyLabel::Anomalous,
                prediction.score < 0.0
            );
        }
    }

    #[test]
    fn extreme_incident_is_flagged() {
        let model = model(Arc::new(InMemoryModelStore::new()));
        let mut incidents = training_set(100);
        incidents.push(incident(999, 20.0, -5.0, 5, 3));
        model.train(&incidents).unwrap();

        let predictions = model.predict(&incidents[100..]).unwrap();
        assert_eq!(predictions[0].label, AnomalyLabel::Anomalous);
    }

    #[test]
    fn same_data_same_scores() {
        let incidents = training_set(50);
        let a = model(Arc::new(InMemoryModelStore::new()));
        let b = model(Arc::new(InMemoryModelStore::new()));
        a.train(&incidents).unwrap();
        b.train(&incidents).unwrap();

        let score = |m: &AnomalyModel| -> Vec<f64> {
            m.predict(&incidents)
                .unwrap()
                .iter()
                .map(|p| p.score)
                .collect()
        };
        assert_eq!(score(&a), score(&b));
    }

    #[test]
    fn failed_persist_keeps_previous_model() {
        let model = model(Arc::new(FailingStore));
        let err = model.train(&training_set(20)).unwrap_err();
        assert!(matches!(err, AnalyticsError::Store(_)));
        assert!(!model.is_trained());
    }

    #[test]
    fn load_restores_persisted_snapshot() {
        let store = Arc::new(InMemoryModelStore::new());
        let incidents = training_set(30);
        let trained = model(store.clone());
        trained.train(&incidents).unwrap();

        let restored = AnomalyModel::load(
            store,
            FeatureEncoder::default(),
            IsolationForestParams::default(),
        );
        assert!(restored.is_trained());

        let before: Vec<f64> = trained
            .predict(&incidents)
            .unwrap()
            .iter()
            .map(|p| p.score)
            .collect();
        let after: Vec<f64> = restored
            .predict(&incidents)
            .unwrap()
            .iter()
            .map(|p| p.score)
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn load_failure_starts_untrained() {
        let model = AnomalyModel::load(
            Arc::new(FailingStore),
            FeatureEncoder::default(),
            IsolationForestParams::default(),
        );
        assert!(!model.is_trained());
    }

    fn scores(model: &AnomalyModel, incidents: &[IncidentRecord]) -> Vec<f64> {
        model
            .predict(incidents)
            .unwrap()
            .iter()
            .map(|p| p.score)
            .collect()
    }

    fn shifted_set(n: usize) -> Vec<IncidentRecord> {
        (0..n)
            .map(|i| {
                let offset = f64::from(u32::try_from(i % 7).unwrap()) * 0.004;
                incident(500 + i, 36.20 - offset, 2.80 + offset, 4, 20)
            })
            .collect()
    }

    #[test]
    fn predictions_during_retrain_come_from_one_snapshot() {
        let first = training_set(60);
        let second = shifted_set(60);
        let mut batch = training_set(10);
        batch.extend(shifted_set(5));
        batch.push(incident(999, 20.0, -5.0, 5, 3));

        let model = model(Arc::new(InMemoryModelStore::new()));
        model.train(&first).unwrap();
        let old_scores = scores(&model, &batch);

        let reference = self::model(Arc::new(InMemoryModelStore::new()));
        reference.train(&second).unwrap();
        let new_scores = scores(&reference, &batch);
        assert_ne!(old_scores, new_scores);

        let observed = std::thread::scope(|scope| {
            let trainer = scope.spawn(|| model.train(&second).unwrap());

            let mut observed = Vec::new();
            loop {
                let done = trainer.is_finished();
                observed.push((model.version(), scores(&model, &batch)));
                if done {
                    break;
                }
            }

            assert!(matches!(
                trainer.join().unwrap(),
                TrainOutcome::Trained { version: 2, .. }
            ));
            observed
        });

        for (_, observed_scores) in &observed {
            assert!(
                *observed_scores == old_scores || *observed_scores == new_scores,
                "mixed scores {observed_scores:?}"
            );
        }
        assert!(observed.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(observed.last().map(|(v, _)| *v), Some(2));
        assert_eq!(observed.last().map(|(_, s)| s), Some(&new_scores));
    }

    #[test]
    fn concurrent_trains_publish_distinct_versions() {
        let first = training_set(40);
        let second = shifted_set(40);
        let model = model(Arc::new(InMemoryModelStore::new()));
        model.train(&first).unwrap();

        let mut versions: Vec<u64> = std::thread::scope(|scope| {
            let a = scope.spawn(|| model.train(&first).unwrap());
            let b = scope.spawn(|| model.train(&second).unwrap());
            [a.join().unwrap(), b.join().unwrap()]
                .into_iter()
                .map(|outcome| match outcome {
                    TrainOutcome::Trained { version, .. } => version,
                    TrainOutcome::InsufficientData { .. } => 0,
                })
                .collect()
        });
        versions.sort_unstable();

        assert_eq!(versions, vec![2, 3]);
        assert_eq!(model.version(), 3);
    }

    #[test]
    fn reasons_follow_rules() {
        let density = PopulationDensityEstimator::new();

        // Severity 5 at 03:00 in an empty region.
        let remote = incident(1, 20.0, -5.0, 5, 3);
        assert_eq!(
            anomaly_reasons(&remote, &density),
            vec![
                "unusually high severity",
                "unusual hour",
                "low-population-density area"
            ]
        );

        // Severity 2 at noon in Algiers.
        let ordinary = incident(2, 36.7538, 3.0588, 2, 12);
        assert!(anomaly_reasons(&ordinary, &density).is_empty());

        // 22:00 and 06:00 are inside the normal window; 23:00 is not.
        assert!(anomaly_reasons(&incident(3, 36.7538, 3.0588, 2, 22), &density).is_empty());
        assert!(anomaly_reasons(&incident(4, 36.7538, 3.0588, 2, 6), &density).is_empty());
        assert_eq!(
            anomaly_reasons(&incident(5, 36.7538, 3.0588, 2, 23), &density),
            vec!["unusual hour"]
        );
    }
}
