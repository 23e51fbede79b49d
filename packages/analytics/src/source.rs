//! Incident history lookups.

use std::sync::{PoisonError, RwLock};

use hazard_map_incident_models::IncidentRecord;
use hazard_map_spatial::haversine_distance_m;

use crate::BoxError;

/// Read access to the stored incident history.
pub trait IncidentSource: Send + Sync {
    /// Every stored incident.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn fetch_all(&self) -> Result<Vec<IncidentRecord>, BoxError>;

    /// Incidents within `radius_m` meters (great-circle) of a point,
    /// nearest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn fetch_near(&self, lat: f64, lng: f64, radius_m: f64)
    -> Result<Vec<IncidentRecord>, BoxError>;
}

/// An [`IncidentSource`] backed by a vector.
#[derive(Debug, Default)]
pub struct InMemoryIncidentSource {
    incidents: RwLock<Vec<IncidentRecord>>,
}

impl InMemoryIncidentSource {
    /// Creates a source holding the given incidents.
    #[must_use]
    pub const fn new(incidents: Vec<IncidentRecord>) -> Self {
        Self {
            incidents: RwLock::new(incidents),
        }
    }

    /// Appends incidents to the history.
    pub fn extend(&self, incidents: impl IntoIterator<Item = IncidentRecord>) {
        self.incidents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(incidents);
    }

    /// Number of stored incidents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.incidents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no incidents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IncidentSource for InMemoryIncidentSource {
    fn fetch_all(&self) -> Result<Vec<IncidentRecord>, BoxError> {
        Ok(self
            .incidents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn fetch_near(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
    ) -> Result<Vec<IncidentRecord>, BoxError> {
        let incidents = self
            .incidents
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut nearby: Vec<(f64, &IncidentRecord)> = incidents
            .iter()
            .map(|inc| {
                (
                    haversine_distance_m(lat, lng, inc.latitude(), inc.longitude()),
                    inc,
                )
            })
            .filter(|(distance, _)| *distance <= radius_m)
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(nearby.into_iter().map(|(_, inc)| inc.clone()).collect())
    }
}
