//! Reference-table population density estimation.
//!
//! Density is modelled as exponential decay away from the single nearest
//! reference city: `peak * exp(-distance_deg * 10)`, floored at
//! [`MIN_DENSITY`]. Distances are planar degrees, which is adequate
//! because every reference city lies in one latitude band.

use crate::degree_distance;

/// Floor applied to every estimate (people/km²).
pub const MIN_DENSITY: f64 = 50.0;

/// Decay rate per degree of distance from the nearest reference city.
const DECAY_PER_DEGREE: f64 = 10.0;

/// A populated place with a known peak density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceCity {
    /// City name.
    pub name: &'static str,
    /// City center latitude.
    pub latitude: f64,
    /// City center longitude.
    pub longitude: f64,
    /// Density at the city center (people/km²).
    pub peak_density: f64,
}

/// Major Algerian population centers.
pub const REFERENCE_CITIES: &[ReferenceCity] = &[
    ReferenceCity {
        name: "alger",
        latitude: 36.7538,
        longitude: 3.0588,
        peak_density: 3000.0,
    },
    ReferenceCity {
        name: "oran",
        latitude: 35.6969,
        longitude: -0.6331,
        peak_density: 1500.0,
    },
    ReferenceCity {
        name: "constantine",
        latitude: 36.3650,
        longitude: 6.6147,
        peak_density: 1200.0,
    },
    ReferenceCity {
        name: "annaba",
        latitude: 36.9000,
        longitude: 7.7667,
        peak_density: 800.0,
    },
    ReferenceCity {
        name: "blida",
        latitude: 36.4203,
        longitude: 2.8277,
        peak_density: 900.0,
    },
    ReferenceCity {
        name: "batna",
        latitude: 35.5559,
        longitude: 6.1741,
        peak_density: 600.0,
    },
    ReferenceCity {
        name: "djelfa",
        latitude: 34.6714,
        longitude: 3.2631,
        peak_density: 400.0,
    },
    ReferenceCity {
        name: "setif",
        latitude: 36.1906,
        longitude: 5.4137,
        peak_density: 700.0,
    },
    ReferenceCity {
        name: "sidi_bel_abbes",
        latitude: 35.1908,
        longitude: -0.6307,
        peak_density: 500.0,
    },
    ReferenceCity {
        name: "biskra",
        latitude: 34.8481,
        longitude: 5.7281,
        peak_density: 450.0,
    },
];

/// Estimates population density from a fixed table of reference cities.
#[derive(Debug, Clone, Copy)]
pub struct PopulationDensityEstimator {
    references: &'static [ReferenceCity],
}

impl Default for PopulationDensityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PopulationDensityEstimator {
    /// Creates an estimator over [`REFERENCE_CITIES`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            references: REFERENCE_CITIES,
        }
    }

    /// Creates an estimator over a custom reference table.
    #[must_use]
    pub const fn with_references(references: &'static [ReferenceCity]) -> Self {
        Self { references }
    }

    /// Returns the reference city closest to the given point, if any.
    ///
    /// Ties keep the earlier table entry.
    #[must_use]
    pub fn nearest(&self, lat: f64, lng: f64) -> Option<(&ReferenceCity, f64)> {
        self.references
            .iter()
            .map(|city| {
                (
                    city,
                    degree_distance(lat, lng, city.latitude, city.longitude),
                )
            })
            .fold(None, |best, (city, distance)| match best {
                Some((_, best_distance)) if best_distance <= distance => best,
                _ => Some((city, distance)),
            })
    }

    /// Estimated population density (people/km²), never below
    /// [`MIN_DENSITY`].
    ///
    /// Total over all inputs: non-finite coordinates yield the floor.
    #[must_use]
    pub fn estimate(&self, lat: f64, lng: f64) -> f64 {
        let density = self
            .nearest(lat, lng)
            .map_or(MIN_DENSITY, |(city, distance)| {
                city.peak_density * (-distance * DECAY_PER_DEGREE).exp()
            });

        if density.is_nan() {
            MIN_DENSITY
        } else {
            density.max(MIN_DENSITY)
        }
    }
}
