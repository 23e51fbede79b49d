//! Fixed-width numeric encoding of incidents.
//!
//! Column order is part of the persisted model contract: a scaler and
//! forest trained on one ordering are meaningless under another.
//!
//! | idx | feature            | default when missing      |
//! |-----|--------------------|---------------------------|
//! | 0   | latitude           |                           |
//! | 1   | longitude          |                           |
//! | 2   | severity           |                           |
//! | 3   | category code      |                           |
//! | 4   | population density | density estimate          |
//! | 5   | hour of day        |                           |
//! | 6   | day of week        | Monday = 0                |
//! | 7   | month              | 1-12                      |
//! | 8   | temperature        | [`DEFAULT_TEMPERATURE`]   |
//! | 9   | humidity           | [`DEFAULT_HUMIDITY`]      |
//! | 10  | wind speed         | [`DEFAULT_WIND_SPEED`]    |

use chrono::{Datelike, Timelike};
use hazard_map_incident_models::IncidentRecord;
use hazard_map_spatial::PopulationDensityEstimator;

/// Number of columns in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 11;

/// One encoded incident.
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Temperature (°C) assumed when no reading was captured.
pub const DEFAULT_TEMPERATURE: f64 = 25.0;
/// Relative humidity (%) assumed when no reading was captured.
pub const DEFAULT_HUMIDITY: f64 = 60.0;
/// Wind speed assumed when no reading was captured.
pub const DEFAULT_WIND_SPEED: f64 = 10.0;

/// Encodes incidents into [`FeatureVector`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureEncoder {
    density: PopulationDensityEstimator,
}

impl FeatureEncoder {
    /// Creates an encoder that falls back to `density` for incidents
    /// without a recorded population density.
    #[must_use]
    pub const fn new(density: PopulationDensityEstimator) -> Self {
        Self { density }
    }

    /// The density estimator used for missing values.
    #[must_use]
    pub const fn density(&self) -> &PopulationDensityEstimator {
        &self.density
    }

    /// Encodes a single incident.
    #[must_use]
    pub fn encode_one(&self, incident: &IncidentRecord) -> FeatureVector {
        let ts = incident.timestamp();
        let weather = incident.weather().copied().unwrap_or_default();
        // A recorded density of zero means "not measured".
        let population_density = incident
            .population_density()
            .filter(|&density| density > 0.0)
            .unwrap_or_else(|| {
                self.density
                    .estimate(incident.latitude(), incident.longitude())
            });

        [
            incident.latitude(),
            incident.longitude(),
            f64::from(incident.severity()),
            f64::from(incident.category().code()),
            population_density,
            f64::from(ts.hour()),
            f64::from(ts.weekday().num_days_from_monday()),
            f64::from(ts.month()),
            weather.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            weather.humidity.unwrap_or(DEFAULT_HUMIDITY),
            weather.wind_speed.unwrap_or(DEFAULT_WIND_SPEED),
        ]
    }

    /// Encodes every incident, preserving order.
    #[must_use]
    pub fn encode(&self, incidents: &[IncidentRecord]) -> Vec<FeatureVector> {
        incidents.iter().map(|inc| self.encode_one(inc)).collect()
    }
}
