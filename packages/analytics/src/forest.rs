//! Seeded isolation forest outlier detector.
//!
//! Each tree isolates a random subsample by recursively splitting on a
//! random feature at a uniformly random threshold. Outliers are isolated
//! in fewer splits, so their average path length across the forest is
//! short.
//!
//! Scores follow the usual normalization `s(x) = -2^(-E[h(x)] / c(ψ))`,
//! where `ψ` is the subsample size and `c` is the expected path length of
//! an unsuccessful binary-search-tree lookup. The decision offset is the
//! `contamination` quantile of the training scores, so roughly that share
//! of the training set falls below zero.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::AnalyticsError;
use crate::features::{FEATURE_COUNT, FeatureVector};

/// Euler–Mascheroni constant.
const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Hyperparameters of an [`IsolationForest`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Upper bound on each tree's subsample size.
    pub max_samples: usize,
    /// Expected share of outliers in the training data, in `(0, 0.5]`.
    pub contamination: f64,
    /// Seed for the tree-building RNG.
    pub seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// A single isolation tree stored as a flat arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(
        rows: &[FeatureVector],
        sample: Vec<usize>,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(rows, sample, 0, max_depth, rng);
        tree
    }

    /// Appends the subtree for `idxs` and returns its node index.
    fn grow(
        &mut self,
        rows: &[FeatureVector],
        idxs: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let node_idx = self.nodes.len();
        self.nodes.push(Node::Leaf { size: idxs.len() });

        if depth >= max_depth || idxs.len() <= 1 {
            return node_idx;
        }

        // Only features that still vary can separate the sample.
        let candidates: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
            .filter_map(|feature| {
                let (min, max) = idxs.iter().map(|&i| rows[i][feature]).fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(min, max), v| (min.min(v), max.max(v)),
                );
                (min < max).then_some((feature, min, max))
            })
            .collect();
        if candidates.is_empty() {
            return node_idx;
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        // Threshold lies in [min, max), so `<=` leaves both sides non-empty.
        let threshold = rng.gen_range(min..max);
        let (left_idxs, right_idxs): (Vec<usize>, Vec<usize>) =
            idxs.into_iter().partition(|&i| rows[i][feature] <= threshold);

        let left = self.grow(rows, left_idxs, depth + 1, max_depth, rng);
        let right = self.grow(rows, right_idxs, depth + 1, max_depth, rng);
        self.nodes[node_idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        node_idx
    }

    #[allow(clippy::cast_precision_loss)]
    fn path_length(&self, row: &FeatureVector) -> f64 {
        let mut idx = 0;
        let mut depth = 0_usize;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                    depth += 1;
                }
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
            }
        }
    }
}

/// Expected path length of an unsuccessful search in a BST of `n` nodes.
#[allow(clippy::cast_precision_loss)]
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile of `values` (`pct` in `[0, 100]`).
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - rank.floor();
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// A fitted isolation forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    params: IsolationForestParams,
    sample_size: usize,
    offset: f64,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    /// Fits a forest on `rows`.
    ///
    /// Deterministic for a given `params.seed` and input.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Model`] if `rows` is empty or the
    /// parameters are out of range.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn fit(rows: &[FeatureVector], params: IsolationForestParams) -> Result<Self, AnalyticsError> {
        if rows.is_empty() {
            return Err(AnalyticsError::Model {
                message: "cannot fit isolation forest on zero rows".to_string(),
            });
        }
        if params.n_estimators == 0 || params.max_samples == 0 {
            return Err(AnalyticsError::Model {
                message: "n_estimators and max_samples must be positive".to_string(),
            });
        }
        if !(params.contamination > 0.0 && params.contamination <= 0.5) {
            return Err(AnalyticsError::Model {
                message: format!(
                    "contamination must be in (0, 0.5], got {}",
                    params.contamination
                ),
            });
        }

        let sample_size = params.max_samples.min(rows.len());
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_estimators)
            .map(|_| {
                let sample = index::sample(&mut rng, rows.len(), sample_size).into_vec();
                IsolationTree::build(rows, sample, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            params,
            sample_size,
            offset: 0.0,
            trees,
        };

        let training_scores = forest.score_samples(rows);
        forest.offset = percentile(&training_scores, 100.0 * params.contamination);

        log::debug!(
            "Fitted isolation forest: {} trees, sample size {sample_size}, offset {:.4}",
            forest.trees.len(),
            forest.offset
        );

        Ok(forest)
    }

    /// Raw normality scores in `[-1, 0)`; lower is more anomalous.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn score_samples(&self, rows: &[FeatureVector]) -> Vec<f64> {
        let normalizer = average_path_length(self.sample_size);
        let tree_count = self.trees.len() as f64;

        rows.iter()
            .map(|row| {
                let mean_depth =
                    self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / tree_count;
                let ratio = if normalizer > 0.0 {
                    mean_depth / normalizer
                } else {
                    0.0
                };
                -(2.0_f64.powf(-ratio))
            })
            .collect()
    }

    /// Offset-adjusted scores; negative values are outliers.
    #[must_use]
    pub fn decision_function(&self, rows: &[FeatureVector]) -> Vec<f64> {
        self.score_samples(rows)
            .into_iter()
            .map(|score| score - self.offset)
            .collect()
    }

    /// The decision threshold subtracted from raw scores.
    #[must_use]
    pub const fn offset(&self) -> f64 {
        self.offset
    }

    /// The parameters this forest was fitted with.
    #[must_use]
    pub const fn params(&self) -> &IsolationForestParams {
        &self.params
    }
}
