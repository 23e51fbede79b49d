#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the hazard map analytics engine.
//!
//! Exposes anomaly detection, risk-zone prediction, hotspot clustering,
//! and on-demand retraining over JSON. Incident history is read from the
//! `DuckDB` store; the trained model is persisted to the model directory
//! and refreshed by a background scheduler.

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::error::InternalError;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use hazard_map_analytics::{
    FileModelStore, HazardService, SystemClock, TrainOutcome, TrainingScheduler,
    retrain_in_background,
};
use hazard_map_database::{DbError, DuckDbIncidentStore, paths};
use hazard_map_server_models::ApiError;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3007;

/// Default hours between scheduled retraining runs.
pub const DEFAULT_RETRAIN_INTERVAL_HOURS: u64 = 24;

/// Server configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Address to bind (`BIND_ADDR`).
    pub bind_addr: String,
    /// Port to bind (`PORT`).
    pub port: u16,
    /// Incident database file (`HAZARD_DB_PATH`).
    pub db_path: PathBuf,
    /// Directory for model artifacts (`HAZARD_MODEL_DIR`).
    pub model_dir: PathBuf,
    /// Hours between scheduled retraining runs; 0 disables the scheduler
    /// (`RETRAIN_INTERVAL_HOURS`).
    pub retrain_interval_hours: u64,
}

impl AppConfig {
    /// Reads the configuration from environment variables, falling back
    /// to defaults for anything missing or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            db_path: std::env::var("HAZARD_DB_PATH")
                .map_or_else(|_| paths::incidents_db_path(), PathBuf::from),
            model_dir: std::env::var("HAZARD_MODEL_DIR")
                .map_or_else(|_| paths::model_dir(), PathBuf::from),
            retrain_interval_hours: std::env::var("RETRAIN_INTERVAL_HOURS")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(DEFAULT_RETRAIN_INTERVAL_HOURS),
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// The analytics engine.
    pub service: Arc<HazardService>,
}

/// Opens the incident store and model directory named by `config` and
/// builds the analytics service on top of them.
///
/// # Errors
///
/// Returns [`DbError`] if the incident database cannot be opened.
pub fn build_service(config: &AppConfig) -> Result<Arc<HazardService>, DbError> {
    log::info!("Opening incident store at {}...", config.db_path.display());
    let store = DuckDbIncidentStore::open(&config.db_path)?;

    log::info!("Loading anomaly model from {}...", config.model_dir.display());
    Ok(Arc::new(HazardService::new(
        Arc::new(store),
        Arc::new(FileModelStore::new(&config.model_dir)),
        Arc::new(SystemClock),
    )))
}

/// Retrains the model once on the stored history and logs the outcome.
///
/// Runs through [`retrain_in_background`], so it shares the training lock
/// with the scheduler and `/api/retrain-models`. Returns `None` if
/// training failed.
pub async fn train_on_startup(service: Arc<HazardService>) -> Option<TrainOutcome> {
    match retrain_in_background(service).await {
        Ok(outcome) => {
            match &outcome {
                TrainOutcome::Trained {
                    version,
                    sample_count,
                } => log::info!(
                    "Startup retraining produced model v{version} ({sample_count} incidents)"
                ),
                TrainOutcome::InsufficientData {
                    available,
                    required,
                } => log::info!(
                    "Startup retraining skipped: {available} incidents (need {required})"
                ),
            }
            Some(outcome)
        }
        Err(e) => {
            log::error!("Startup retraining failed: {e}");
            None
        }
    }
}

/// Registers the `/api` routes and the JSON error handler.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let body = ApiError::new(format!("Invalid request body: {err}"));
        InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    });

    cfg.app_data(json_config).service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/detect-anomalies", web::post().to(handlers::detect_anomalies))
            .route("/predict-risk-zones", web::post().to(handlers::predict_risk_zones))
            .route("/cluster-incidents", web::post().to(handlers::cluster_incidents))
            .route("/retrain-models", web::post().to(handlers::retrain_models)),
    );
}

/// Starts the hazard map API server.
///
/// Opens the incident store, restores the persisted model, retrains once
/// in the background, starts the retraining scheduler, and serves until
/// shutdown. This is a regular
/// async function; the caller provides the runtime (e.g. via
/// `#[actix_web::main]`) and initializes logging.
///
/// # Errors
///
/// Returns an `std::io::Result` error if the incident store cannot be
/// opened, or the HTTP server fails to bind or encounters a runtime
/// error.
#[allow(clippy::future_not_send)]
pub async fn run_server(config: AppConfig) -> std::io::Result<()> {
    let service = build_service(&config).map_err(std::io::Error::other)?;

    // Requests are served from the restored model until this finishes.
    actix_web::rt::spawn(train_on_startup(service.clone()));

    let scheduler = if config.retrain_interval_hours == 0 {
        log::info!("Scheduled retraining disabled");
        None
    } else {
        Some(TrainingScheduler::every_hours(config.retrain_interval_hours).spawn(service.clone()))
    };

    let state = web::Data::new(AppState { service });

    log::info!("Starting server on {}:{}", config.bind_addr, config.port);

    let result = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }

    result
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use hazard_map_analytics::{FixedClock, InMemoryIncidentSource, InMemoryModelStore};
    use hazard_map_incident_models::{IncidentCategory, IncidentRecord};

    use super::*;

    fn service(n: u32) -> Arc<HazardService> {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let incidents = (0..n)
            .map(|i| {
                let jitter = f64::from(i % 10) * 0.002;
                IncidentRecord::new(
                    format!("h{i}"),
                    36.75 + jitter,
                    3.05 - jitter,
                    IncidentCategory::Flood,
                    2,
                    base + Duration::hours(i64::from(i % 12)),
                )
                .unwrap()
            })
            .collect();

        Arc::new(HazardService::new(
            Arc::new(InMemoryIncidentSource::new(incidents)),
            Arc::new(InMemoryModelStore::new()),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())),
        ))
    }

    #[actix_web::test]
    async fn startup_training_publishes_first_model() {
        let service = service(40);
        assert!(!service.model().is_trained());

        let outcome = train_on_startup(service.clone()).await;
        assert_eq!(
            outcome,
            Some(TrainOutcome::Trained {
                version: 1,
                sample_count: 40
            })
        );
        assert!(service.model().is_trained());
        assert_eq!(service.model().version(), 1);
    }

    #[actix_web::test]
    async fn startup_training_with_short_history_leaves_model_untrained() {
        let service = service(3);

        let outcome = train_on_startup(service.clone()).await;
        assert!(matches!(
            outcome,
            Some(TrainOutcome::InsufficientData { available: 3, .. })
        ));
        assert!(!service.model().is_trained());
    }

    #[actix_web::test]
    async fn startup_training_bumps_existing_model_version() {
        let service = service(40);
        service.retrain().unwrap();

        let outcome = train_on_startup(service.clone()).await;
        assert!(matches!(
            outcome,
            Some(TrainOutcome::Trained { version: 2, .. })
        ));
    }
}
