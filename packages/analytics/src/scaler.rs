//! Per-feature standardization.

use serde::{Deserialize, Serialize};

use crate::features::{FEATURE_COUNT, FeatureVector};
use crate::AnalyticsError;

/// Standard deviations at or below this are treated as zero variance.
const MIN_SCALE: f64 = 1e-12;

/// Shifts each column to zero mean and unit variance.
///
/// Columns with zero variance are shifted but not scaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Learns column means and population standard deviations.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Model`] if `rows` is empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(rows: &[FeatureVector]) -> Result<Self, AnalyticsError> {
        if rows.is_empty() {
            return Err(AnalyticsError::Model {
                message: "cannot fit scaler on zero rows".to_string(),
            });
        }
        let n = rows.len() as f64;

        let mut means = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value;
            }
        }
        for mean in &mut means {
            *mean /= n;
        }

        let mut scales = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for ((var, value), mean) in scales.iter_mut().zip(row).zip(&means) {
                *var += (value - mean).powi(2);
            }
        }
        for scale in &mut scales {
            let std = (*scale / n).sqrt();
            *scale = if std > MIN_SCALE { std } else { 1.0 };
        }

        Ok(Self { means, scales })
    }

    /// Standardizes rows with the learned parameters.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Model`] if the scaler was fitted on a
    /// different column count (e.g. a stale persisted model).
    pub fn transform(&self, rows: &[FeatureVector]) -> Result<Vec<FeatureVector>, AnalyticsError> {
        if self.means.len() != FEATURE_COUNT || self.scales.len() != FEATURE_COUNT {
            return Err(AnalyticsError::Model {
                message: format!(
                    "scaler expects {} features, encoder produces {FEATURE_COUNT}",
                    self.means.len()
                ),
            });
        }

        Ok(rows
            .iter()
            .map(|row| {
                let mut out = *row;
                for ((value, mean), scale) in out.iter_mut().zip(&self.means).zip(&self.scales) {
                    *value = (*value - mean) / scale;
                }
                out
            })
            .collect())
    }
}
