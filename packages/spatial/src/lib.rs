#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Spatial primitives for hazard analytics.
//!
//! Provides the reference-table population density estimator, the
//! density-based hotspot clusterer (DBSCAN over an R-tree), and the two
//! distance measures used across the system:
//!
//! - [`degree_distance`]: planar Euclidean distance in raw degrees. Used by
//!   density estimation and clustering; only meaningful inside a single
//!   latitude band.
//! - [`haversine_distance_m`]: great-circle distance in meters. Used by
//!   incident stores to answer radius queries.

pub mod cluster;
pub mod density;

pub use cluster::{MIN_CLUSTER_INCIDENTS, SpatialClusterer};
pub use density::{MIN_DENSITY, PopulationDensityEstimator, REFERENCE_CITIES, ReferenceCity};

use geo::{Distance, Euclidean, Haversine, Point};

/// Approximate meters per degree, used to report cluster radii.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Planar distance between two coordinates, in degrees.
#[must_use]
pub fn degree_distance(lat_a: f64, lng_a: f64, lat_b: f64, lng_b: f64) -> f64 {
    Euclidean.distance(Point::new(lng_a, lat_a), Point::new(lng_b, lat_b))
}

/// Great-circle distance between two coordinates, in meters.
#[must_use]
pub fn haversine_distance_m(lat_a: f64, lng_a: f64, lat_b: f64, lng_b: f64) -> f64 {
    Haversine.distance(Point::new(lng_a, lat_a), Point::new(lng_b, lat_b))
}

/// Degree deltas `(d_lat, d_lng)` that bound a circle of `radius_m`
/// meters around `lat`.
///
/// Stores use this as a cheap prefilter before the exact haversine check.
/// Near the poles the longitude delta is capped at a full revolution.
#[must_use]
pub fn radius_to_degree_box(lat: f64, radius_m: f64) -> (f64, f64) {
    let d_lat = radius_m / METERS_PER_DEGREE;
    let cos_lat = lat.to_radians().cos().abs();
    let d_lng = if cos_lat < 1e-6 {
        360.0
    } else {
        (d_lat / cos_lat).min(360.0)
    };
    // Pad by 1% so rounding at the edge never drops a true match.
    (d_lat * 1.01, d_lng * 1.01)
}
