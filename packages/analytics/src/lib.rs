#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Hazard analytics engine.
//!
//! Turns a stream of disaster incidents into three products:
//!
//! - **Anomaly findings**: an isolation-forest outlier model over an
//!   11-feature encoding of each incident, plus rule-based explanations.
//! - **Risk zones**: a heuristic score over a grid of points, driven by
//!   nearby incident history and population density.
//! - **Hotspots**: density-based clusters (delegated to
//!   [`hazard_map_spatial`]).
//!
//! The engine talks to the outside world through three seams:
//! [`IncidentSource`] (history lookups), [`ModelStore`] (trained model
//! persistence), and [`Clock`] (the notion of "now"). In-memory
//! implementations of each live alongside the traits for tests and
//! embedding.

pub mod clock;
pub mod features;
pub mod forest;
pub mod model;
pub mod risk;
pub mod scaler;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use features::{FEATURE_COUNT, FeatureEncoder, FeatureVector};
pub use forest::{IsolationForest, IsolationForestParams};
pub use model::{AnomalyModel, ModelState, Prediction, TrainOutcome, anomaly_reasons};
pub use risk::RiskScorer;
pub use scaler::StandardScaler;
pub use scheduler::{SchedulerHandle, TrainingScheduler, retrain_in_background};
pub use service::HazardService;
pub use source::{IncidentSource, InMemoryIncidentSource};
pub use store::{FileModelStore, InMemoryModelStore, ModelStore};

use thiserror::Error;

/// Boxed error returned by collaborator implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during analytics operations.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// The incident source failed to answer a query.
    #[error("Incident source error: {0}")]
    Source(#[source] BoxError),

    /// The model store failed to load or persist a model.
    #[error("Model store error: {0}")]
    Store(#[source] BoxError),

    /// The model could not be fitted or applied.
    #[error("Model error: {message}")]
    Model {
        /// Description of the failure
        message: String,
    },

    /// A blocking training task panicked or was cancelled.
    #[error("Task join error: {0}")]
    Task(#[from] tokio::task::JoinError),
}
