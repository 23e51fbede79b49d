//! Heuristic location risk scoring.
//!
//! A location's score combines four bounded signals drawn from the
//! incident history around it:
//!
//! | signal                         | saturates at | weight |
//! |--------------------------------|--------------|--------|
//! | incidents within 5 km          | 10           | 0.3    |
//! | mean severity of those         | 5            | 0.3    |
//! | of those, in the last 30 days  | 5            | 0.2    |
//! | estimated population density   | 1000 /km²    | 0.2    |
//!
//! A location with no nearby history scores a flat baseline of 0.1.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use hazard_map_analytics_models::{RegionBounds, RiskCategory, RiskPrediction};
use hazard_map_incident_models::IncidentRecord;
use hazard_map_spatial::PopulationDensityEstimator;

use crate::clock::Clock;
use crate::source::IncidentSource;
use crate::AnalyticsError;

/// Radius of the history considered when scoring a point.
pub const SCORE_RADIUS_M: f64 = 5_000.0;
/// Radius of the history considered when explaining a point.
pub const FACTOR_RADIUS_M: f64 = 10_000.0;
/// Score of a location with no nearby incidents.
pub const BASELINE_SCORE: f64 = 0.1;
/// Grid points per axis in a zone scan.
pub const GRID_RESOLUTION: usize = 20;
/// Zone scans only report points scoring above this.
pub const ZONE_THRESHOLD: f64 = 0.3;
/// Confidence attached to every zone prediction.
pub const ZONE_CONFIDENCE: f64 = 0.8;
/// Incidents younger than this count as recent.
pub const RECENT_WINDOW_DAYS: i64 = 30;

const COUNT_SATURATION: f64 = 10.0;
const SEVERITY_SATURATION: f64 = 5.0;
const RECENT_SATURATION: f64 = 5.0;
const DENSITY_SATURATION: f64 = 1_000.0;

const COUNT_WEIGHT: f64 = 0.3;
const SEVERITY_WEIGHT: f64 = 0.3;
const RECENT_WEIGHT: f64 = 0.2;
const DENSITY_WEIGHT: f64 = 0.2;

/// Densities above this are called out as a risk factor.
const DENSE_AREA: f64 = 1_000.0;
/// Points north of this latitude are treated as coastal.
const COASTAL_LATITUDE: f64 = 36.0;
/// Points west of this longitude are treated as border regions.
const BORDER_LONGITUDE: f64 = 2.0;

/// Scores locations by their surrounding incident history.
pub struct RiskScorer {
    source: Arc<dyn IncidentSource>,
    clock: Arc<dyn Clock>,
    density: PopulationDensityEstimator,
}

impl std::fmt::Debug for RiskScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskScorer").finish_non_exhaustive()
    }
}

fn ratio(value: f64, saturation: f64) -> f64 {
    (value / saturation).clamp(0.0, 1.0)
}

impl RiskScorer {
    /// Creates a scorer over `source`, judging recency against `clock`.
    #[must_use]
    pub fn new(
        source: Arc<dyn IncidentSource>,
        clock: Arc<dyn Clock>,
        density: PopulationDensityEstimator,
    ) -> Self {
        Self {
            source,
            clock,
            density,
        }
    }

    /// Maps a score onto its tier.
    #[must_use]
    pub fn categorize(score: f64) -> RiskCategory {
        RiskCategory::from_score(score)
    }

    fn nearby(&self, lat: f64, lng: f64, radius_m: f64) -> Result<Vec<IncidentRecord>, AnalyticsError> {
        self.source
            .fetch_near(lat, lng, radius_m)
            .map_err(AnalyticsError::Source)
    }

    /// Risk score in `[0, 1]` for a single location.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Source`] if the incident history cannot
    /// be queried.
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, lat: f64, lng: f64) -> Result<f64, AnalyticsError> {
        let nearby = self.nearby(lat, lng, SCORE_RADIUS_M)?;
        if nearby.is_empty() {
            return Ok(BASELINE_SCORE);
        }

        let count = nearby.len() as f64;
        let mean_severity = nearby
            .iter()
            .map(|inc| f64::from(inc.severity()))
            .sum::<f64>()
            / count;

        let now = self.clock.now();
        let window = Duration::days(RECENT_WINDOW_DAYS);
        // Future-dated incidents have a negative age and count as recent.
        let recent = nearby
            .iter()
            .filter(|inc| now.signed_duration_since(inc.timestamp()) < window)
            .count() as f64;

        let density = self.density.estimate(lat, lng);

        let score = ratio(count, COUNT_SATURATION) * COUNT_WEIGHT
            + ratio(mean_severity, SEVERITY_SATURATION) * SEVERITY_WEIGHT
            + ratio(recent, RECENT_SATURATION) * RECENT_WEIGHT
            + ratio(density, DENSITY_SATURATION) * DENSITY_WEIGHT;

        Ok(score.clamp(0.0, 1.0))
    }

    /// Human-readable reasons a location carries risk. May be empty.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Source`] if the incident history cannot
    /// be queried.
    pub fn identify_risk_factors(&self, lat: f64, lng: f64) -> Result<Vec<String>, AnalyticsError> {
        let mut factors = Vec::new();

        let nearby = self.nearby(lat, lng, FACTOR_RADIUS_M)?;
        if let Some(category) = most_common_category(&nearby) {
            factors.push(format!("history of {category}"));
        }

        if self.density.estimate(lat, lng) > DENSE_AREA {
            factors.push("densely populated area".to_string());
        }
        if lat > COASTAL_LATITUDE {
            factors.push("coastal area — flood risk".to_string());
        }
        if lng < BORDER_LONGITUDE {
            factors.push("border proximity — security risk".to_string());
        }

        Ok(factors)
    }

    /// Scans a 20×20 grid over `bounds` (edges inclusive) and reports
    /// every point scoring above 0.3, in row-major order.
    ///
    /// Inverted or degenerate bounds are scanned as given.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Source`] if the incident history cannot
    /// be queried.
    pub fn predict_risk_zones(
        &self,
        bounds: &RegionBounds,
    ) -> Result<Vec<RiskPrediction>, AnalyticsError> {
        let lats = linspace(bounds.lat_min, bounds.lat_max, GRID_RESOLUTION);
        let lngs = linspace(bounds.lng_min, bounds.lng_max, GRID_RESOLUTION);

        let mut predictions = Vec::new();
        for &lat in &lats {
            for &lng in &lngs {
                let score = self.score(lat, lng)?;
                if score <= ZONE_THRESHOLD {
                    continue;
                }
                predictions.push(RiskPrediction {
                    latitude: lat,
                    longitude: lng,
                    risk_level: score,
                    risk_category: Self::categorize(score),
                    confidence: ZONE_CONFIDENCE,
                    factors: self.identify_risk_factors(lat, lng)?,
                });
            }
        }

        log::debug!(
            "Risk zone scan over {bounds:?}: {} of {} points above {ZONE_THRESHOLD}",
            predictions.len(),
            lats.len() * lngs.len()
        );

        Ok(predictions)
    }
}

/// Most frequent category name; ties go to the alphabetically first.
fn most_common_category(incidents: &[IncidentRecord]) -> Option<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for incident in incidents {
        *counts.entry(incident.category().to_string()).or_default() += 1;
    }

    counts
        .into_iter()
        .max_by(|(a_name, a_count), (b_name, b_count)| {
            a_count.cmp(b_count).then_with(|| b_name.cmp(a_name))
        })
        .map(|(name, _)| name)
}

/// `n` evenly spaced values from `start` to `end`, both inclusive.
#[allow(clippy::cast_precision_loss)]
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use hazard_map_incident_models::IncidentCategory;

    use super::*;
    use crate::clock::FixedClock;
    use crate::source::InMemoryIncidentSource;
    use crate::BoxError;

    struct FailingSource;

    impl IncidentSource for FailingSource {
        fn fetch_all(&self) -> Result<Vec<IncidentRecord>, BoxError> {
            Err("connection refused".into())
        }

        fn fetch_near(&self, _: f64, _: f64, _: f64) -> Result<Vec<IncidentRecord>, BoxError> {
            Err("connection refused".into())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn incident(
        id: &str,
        lat: f64,
        lng: f64,
        category: IncidentCategory,
        severity: u8,
        days_ago: i64,
    ) -> IncidentRecord {
        IncidentRecord::new(
            id,
            lat,
            lng,
            category,
            severity,
            now() - Duration::days(days_ago),
        )
        .unwrap()
    }

    fn scorer(incidents: Vec<IncidentRecord>) -> RiskScorer {
        RiskScorer::new(
            Arc::new(InMemoryIncidentSource::new(incidents)),
            Arc::new(FixedClock(now())),
            PopulationDensityEstimator::new(),
        )
    }

    #[test]
    fn empty_history_scores_baseline() {
        let scorer = scorer(Vec::new());
        assert!((scorer.score(36.75, 3.05).unwrap() - BASELINE_SCORE).abs() < f64::EPSILON);
        assert!(scorer.score(20.0, -5.0).unwrap() >= 0.1);
    }

    #[test]
    fn saturated_history_in_algiers_scores_one() {
        // Twelve severity-5 incidents from the last week, next to Algiers.
        let incidents = (0..12)
            .map(|i| {
                incident(
                    &format!("i{i}"),
                    36.7538,
                    3.0588,
                    IncidentCategory::Flood,
                    5,
                    i % 7,
                )
            })
            .collect();
        let scorer = scorer(incidents);

        let score = scorer.score(36.7538, 3.0588).unwrap();
        assert!((score - 1.0).abs() < 1e-9, "score {score}");
        assert_eq!(RiskScorer::categorize(score), RiskCategory::Critical);
    }

    #[test]
    fn score_combines_weighted_signals() {
        // Far from every reference city, so density contributes its floor.
        let incidents = vec![
            incident("a", 20.0, -5.0, IncidentCategory::Fire, 2, 1),
            incident("b", 20.001, -5.0, IncidentCategory::Fire, 4, 60),
        ];
        let scorer = scorer(incidents);

        let expected = (2.0 / 10.0) * 0.3 + (3.0 / 5.0) * 0.3 + (1.0 / 5.0) * 0.2 + (50.0 / 1000.0) * 0.2;
        let score = scorer.score(20.0, -5.0).unwrap();
        assert!((score - expected).abs() < 1e-12, "score {score}");
    }

    #[test]
    fn thirty_day_old_incident_is_not_recent() {
        let recent = scorer(vec![incident("a", 20.0, -5.0, IncidentCategory::Fire, 1, 29)]);
        let stale = scorer(vec![incident("a", 20.0, -5.0, IncidentCategory::Fire, 1, 30)]);
        let future = scorer(vec![incident("a", 20.0, -5.0, IncidentCategory::Fire, 1, -3)]);

        let recent_score = recent.score(20.0, -5.0).unwrap();
        let stale_score = stale.score(20.0, -5.0).unwrap();
        assert!((recent_score - stale_score - 0.04).abs() < 1e-12);
        assert!((future.score(20.0, -5.0).unwrap() - recent_score).abs() < 1e-12);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let incidents = (0..50)
            .map(|i| incident(&format!("i{i}"), 36.75, 3.05, IncidentCategory::Storm, 200, 0))
            .collect();
        let scorer = scorer(incidents);
        for (lat, lng) in [(36.75, 3.05), (0.0, 0.0), (-89.0, 179.0)] {
            let score = scorer.score(lat, lng).unwrap();
            assert!((0.0..=1.0).contains(&score), "score {score}");
        }
    }

    #[test]
    fn factors_name_most_common_category_and_geography() {
        let incidents = vec![
            incident("a", 36.76, 3.06, IncidentCategory::Storm, 2, 1),
            incident("b", 36.76, 3.06, IncidentCategory::Flood, 2, 1),
            incident("c", 36.76, 3.06, IncidentCategory::Flood, 2, 1),
        ];
        let scorer = scorer(incidents);

        let factors = scorer.identify_risk_factors(36.7538, 3.0588).unwrap();
        assert_eq!(
            factors,
            vec![
                "history of flood",
                "densely populated area",
                "coastal area — flood risk"
            ]
        );

        let west = scorer.identify_risk_factors(35.0, 1.0).unwrap();
        assert_eq!(west, vec!["border proximity — security risk"]);
    }

    #[test]
    fn category_ties_break_alphabetically() {
        let incidents = vec![
            incident("a", 30.0, 10.0, IncidentCategory::Storm, 2, 1),
            incident("b", 30.0, 10.0, IncidentCategory::Fire, 2, 1),
        ];
        assert_eq!(most_common_category(&incidents).as_deref(), Some("fire"));
        assert_eq!(most_common_category(&[]), None);
    }

    #[test]
    fn linspace_includes_both_edges() {
        let values = linspace(35.0, 37.0, 20);
        assert_eq!(values.len(), 20);
        assert!((values[0] - 35.0).abs() < f64::EPSILON);
        assert!((values[19] - 37.0).abs() < f64::EPSILON);
        assert_eq!(linspace(1.0, 1.0, 3), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn zone_scan_over_empty_history_is_empty() {
        let scorer = scorer(Vec::new());
        let zones = scorer
            .predict_risk_zones(&RegionBounds::new(35.0, 37.0, 2.0, 4.0))
            .unwrap();
        assert!(zones.is_empty());
    }

    #[test]
    fn zone_scan_reports_hot_points_only() {
        // Grid spacing is ~11.7 km, so only the south-west corner is
        // within 5 km of the incidents.
        let incidents = (0..10)
            .map(|i| incident(&format!("i{i}"), 35.0, 2.0, IncidentCategory::Earthquake, 5, 2))
            .collect();
        let scorer = scorer(incidents);

        let zones = scorer
            .predict_risk_zones(&RegionBounds::new(35.0, 37.0, 2.0, 4.0))
            .unwrap();

        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert!((zone.latitude - 35.0).abs() < f64::EPSILON);
        assert!((zone.longitude - 2.0).abs() < f64::EPSILON);
        assert!(zone.risk_level > ZONE_THRESHOLD);
        assert_eq!(zone.risk_category, RiskCategory::Critical);
        assert!((zone.confidence - ZONE_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!(zone.factors, vec!["history of earthquake"]);
    }

    #[test]
    fn zone_scan_west_of_border_line_carries_border_factor() {
        let incidents = (0..10)
            .map(|i| incident(&format!("w{i}"), 35.0, 1.5, IncidentCategory::Security, 5, 2))
            .collect();
        let scorer = scorer(incidents);

        let zones = scorer
            .predict_risk_zones(&RegionBounds::new(35.0, 37.0, 1.5, 3.5))
            .unwrap();

        assert_eq!(zones.len(), 1);
        assert_eq!(
            zones[0].factors,
            vec!["history of security", "border proximity — security risk"]
        );
    }

    #[test]
    fn source_failure_propagates() {
        let scorer = RiskScorer::new(
            Arc::new(FailingSource),
            Arc::new(FixedClock(now())),
            PopulationDensityEstimator::new(),
        );
        assert!(matches!(
            scorer.score(36.75, 3.05),
            Err(AnalyticsError::Source(_))
        ));
        assert!(scorer
            .predict_risk_zones(&RegionBounds::new(35.0, 37.0, 2.0, 4.0))
            .is_err());
    }
}
