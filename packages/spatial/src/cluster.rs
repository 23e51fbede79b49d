//! Density-based hotspot clustering.
//!
//! Runs DBSCAN over raw `(lat, lng)` pairs treated as planar points, using
//! an R-tree for neighborhood queries. Noise points are dropped; every
//! remaining cluster is summarized into a [`ClusterSummary`].

use std::collections::VecDeque;

use hazard_map_analytics_models::{ClusterSummary, GeoPoint, RiskCategory};
use hazard_map_incident_models::IncidentRecord;
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::{METERS_PER_DEGREE, degree_distance};

/// Fewer incidents than this produce no clusters at all.
pub const MIN_CLUSTER_INCIDENTS: usize = 3;

/// Default neighborhood radius in degrees (roughly 1 km).
const DEFAULT_EPS_DEGREES: f64 = 0.01;

/// Default minimum neighborhood size, counting the point itself.
const DEFAULT_MIN_SAMPLES: usize = 2;

/// Severity that maps a cluster to the top of the risk scale.
const MAX_SEVERITY: f64 = 5.0;

/// An R-tree point tagged with its index in the input slice.
type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Groups incidents into density-based hotspots.
#[derive(Debug, Clone, Copy)]
pub struct SpatialClusterer {
    eps_degrees: f64,
    min_samples: usize,
}

impl Default for SpatialClusterer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialClusterer {
    /// Creates a clusterer with a 0.01° radius and a minimum size of 2.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            eps_degrees: DEFAULT_EPS_DEGREES,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }

    /// Creates a clusterer with custom DBSCAN parameters.
    #[must_use]
    pub const fn with_params(eps_degrees: f64, min_samples: usize) -> Self {
        Self {
            eps_degrees,
            min_samples,
        }
    }

    /// Clusters the incidents and summarizes every non-noise cluster.
    ///
    /// Returns an empty vector for fewer than [`MIN_CLUSTER_INCIDENTS`]
    /// incidents. Summaries are ordered by cluster label.
    #[must_use]
    pub fn cluster(&self, incidents: &[IncidentRecord]) -> Vec<ClusterSummary> {
        if incidents.len() < MIN_CLUSTER_INCIDENTS {
            log::debug!(
                "Skipping clustering: {} incidents (need {MIN_CLUSTER_INCIDENTS})",
                incidents.len()
            );
            return Vec::new();
        }

        let points: Vec<[f64; 2]> = incidents
            .iter()
            .map(|inc| [inc.latitude(), inc.longitude()])
            .collect();
        let labels = self.labels(&points);

        let cluster_count = labels.iter().flatten().max().map_or(0, |max| max + 1);
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); cluster_count];
        for (idx, label) in labels.iter().enumerate() {
            if let Some(label) = label {
                members[*label].push(idx);
            }
        }

        let summaries: Vec<ClusterSummary> = members
            .iter()
            .enumerate()
            .filter(|(_, idxs)| idxs.len() >= self.min_samples.max(1))
            .map(|(label, idxs)| summarize(label, idxs, incidents))
            .collect();

        log::debug!(
            "Clustered {} incidents into {} hotspots ({} noise)",
            incidents.len(),
            summaries.len(),
            labels.iter().filter(|l| l.is_none()).count()
        );

        summaries
    }

    /// Assigns a DBSCAN label to every point; `None` marks noise.
    ///
    /// Labels are numbered in the order their first core point appears in
    /// the input.
    fn labels(&self, points: &[[f64; 2]]) -> Vec<Option<usize>> {
        let tree = RTree::bulk_load(
            points
                .iter()
                .enumerate()
                .map(|(idx, point)| IndexedPoint::new(*point, idx))
                .collect(),
        );
        let max_distance_2 = self.eps_degrees * self.eps_degrees;

        let neighborhoods: Vec<Vec<usize>> = points
            .iter()
            .map(|point| {
                let mut idxs: Vec<usize> = tree
                    .locate_within_distance(*point, max_distance_2)
                    .map(|entry| entry.data)
                    .collect();
                idxs.sort_unstable();
                idxs
            })
            .collect();
        let is_core: Vec<bool> = neighborhoods
            .iter()
            .map(|n| n.len() >= self.min_samples)
            .collect();

        let mut labels: Vec<Option<usize>> = vec![None; points.len()];
        let mut next_label = 0;

        for start in 0..points.len() {
            if labels[start].is_some() || !is_core[start] {
                continue;
            }

            labels[start] = Some(next_label);
            let mut queue = VecDeque::from([start]);

            while let Some(current) = queue.pop_front() {
                if !is_core[current] {
                    continue;
                }
                for &neighbor in &neighborhoods[current] {
                    if labels[neighbor].is_none() {
                        labels[neighbor] = Some(next_label);
                        queue.push_back(neighbor);
                    }
                }
            }

            next_label += 1;
        }

        labels
    }
}

#[allow(clippy::cast_precision_loss)]
fn summarize(label: usize, idxs: &[usize], incidents: &[IncidentRecord]) -> ClusterSummary {
    let count = idxs.len() as f64;
    let members: Vec<&IncidentRecord> = idxs.iter().map(|&i| &incidents[i]).collect();

    let center_lat = members.iter().map(|m| m.latitude()).sum::<f64>() / count;
    let center_lng = members.iter().map(|m| m.longitude()).sum::<f64>() / count;

    let radius_degrees = members
        .iter()
        .map(|m| degree_distance(m.latitude(), m.longitude(), center_lat, center_lng))
        .fold(0.0_f64, f64::max);

    let mean_severity = members
        .iter()
        .map(|m| f64::from(m.severity()))
        .sum::<f64>()
        / count;

    ClusterSummary {
        id: format!("cluster_{label}"),
        centroid: GeoPoint {
            latitude: center_lat,
            longitude: center_lng,
        },
        radius_meters: radius_degrees * METERS_PER_DEGREE,
        member_count: members.len(),
        mean_severity,
        risk_category: RiskCategory::from_score(mean_severity / MAX_SEVERITY),
        member_ids: members.iter().map(|m| m.id().to_string()).collect(),
    }
}
