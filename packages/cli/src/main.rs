#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line interface for the hazard map analytics engine.
//!
//! Imports incident history into the `DuckDB` store, retrains the anomaly
//! model, runs one-off analyses over JSON files, and starts the API
//! server. Analysis results are printed as pretty JSON in the same shape
//! the HTTP API returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hazard_map_analytics::{
    FileModelStore, HazardService, SystemClock, TrainOutcome, retrain_in_background,
};
use hazard_map_analytics_models::RegionBounds;
use hazard_map_database::{DuckDbIncidentStore, paths, read_incidents_json};
use hazard_map_server::AppConfig;
use hazard_map_server_models::{
    AnomaliesResponse, ClustersResponse, RetrainResponse, RiskZonesResponse,
};
use hazard_map_spatial::SpatialClusterer;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "hazard_map", about = "Disaster risk analytics for the hazard map")]
struct Cli {
    /// Incident database file [default: data/shared/incidents.duckdb]
    #[arg(long, env = "HAZARD_DB_PATH", global = true)]
    db: Option<PathBuf>,

    /// Directory holding the trained model [default: data/models]
    #[arg(long, env = "HAZARD_MODEL_DIR", global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import incidents from a JSON file into the incident database
    Import {
        /// JSON array of incidents, or an object with an `incidents` array
        file: PathBuf,
    },
    /// Retrain the anomaly model on the stored incident history
    Train,
    /// Report the anomalous incidents in a JSON file
    Detect {
        /// JSON array of incidents, or an object with an `incidents` array
        file: PathBuf,
    },
    /// Group the incidents in a JSON file into hotspots
    Cluster {
        /// JSON array of incidents, or an object with an `incidents` array
        file: PathBuf,
    },
    /// Scan a region for high-risk zones
    RiskZones {
        /// Southern edge
        #[arg(long, allow_hyphen_values = true)]
        lat_min: f64,
        /// Northern edge
        #[arg(long, allow_hyphen_values = true)]
        lat_max: f64,
        /// Western edge
        #[arg(long, allow_hyphen_values = true)]
        lng_min: f64,
        /// Eastern edge
        #[arg(long, allow_hyphen_values = true)]
        lng_max: f64,
    },
    /// Start the API server
    Serve,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReport {
    imported: u64,
    skipped: u64,
    total: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(paths::incidents_db_path);
    let model_dir = cli.model_dir.unwrap_or_else(paths::model_dir);

    match cli.command {
        Commands::Import { file } => {
            let store = DuckDbIncidentStore::open(&db_path)?;
            let summary = store.import_json(&file)?;
            print_json(&ImportReport {
                imported: summary.imported,
                skipped: summary.skipped,
                total: store.count()?,
            })?;
        }
        Commands::Train => {
            let service = open_service(&db_path, &model_dir)?;
            let response = match retrain_in_background(service.clone()).await? {
                TrainOutcome::Trained {
                    version,
                    sample_count,
                } => RetrainResponse {
                    message: format!("Model saved to {}", model_dir.display()),
                    trained: true,
                    version: Some(version),
                    sample_count,
                },
                TrainOutcome::InsufficientData {
                    available,
                    required,
                } => RetrainResponse {
                    message: format!(
                        "Not enough incidents to train: {available} available, \
                         {required} required"
                    ),
                    trained: false,
                    version: service
                        .model()
                        .is_trained()
                        .then(|| service.model().version()),
                    sample_count: available,
                },
            };
            print_json(&response)?;
        }
        Commands::Detect { file } => {
            let (incidents, skipped) = read_incidents_json(&file)?;
            if skipped > 0 {
                log::warn!("Ignoring {skipped} invalid incidents in {}", file.display());
            }

            let service = open_service(&db_path, &model_dir)?;
            if !service.model().is_trained() {
                log::warn!(
                    "No trained model in {}; run `hazard_map train` first",
                    model_dir.display()
                );
            }

            let anomalies = service.detect_anomalies(&incidents)?;
            print_json(&AnomaliesResponse { anomalies })?;
        }
        Commands::Cluster { file } => {
            let (incidents, skipped) = read_incidents_json(&file)?;
            if skipped > 0 {
                log::warn!("Ignoring {skipped} invalid incidents in {}", file.display());
            }

            let clusters = SpatialClusterer::new().cluster(&incidents);
            print_json(&ClustersResponse { clusters })?;
        }
        Commands::RiskZones {
            lat_min,
            lat_max,
            lng_min,
            lng_max,
        } => {
            let bounds = RegionBounds::new(lat_min, lat_max, lng_min, lng_max);
            if !bounds.is_finite() {
                return Err("region bounds must be finite".into());
            }

            let service = open_service(&db_path, &model_dir)?;
            let predictions = service.predict_risk_zones(&bounds)?;
            print_json(&RiskZonesResponse { predictions })?;
        }
        Commands::Serve => {
            let config = AppConfig {
                db_path,
                model_dir,
                ..AppConfig::from_env()
            };

            // The server uses actix-web's runtime, so we need to run it
            // in a blocking task to avoid nesting tokio runtimes.
            tokio::task::spawn_blocking(move || {
                actix_web::rt::System::new().block_on(hazard_map_server::run_server(config))
            })
            .await??;
        }
    }

    Ok(())
}

fn open_service(
    db_path: &Path,
    model_dir: &Path,
) -> Result<Arc<HazardService>, Box<dyn std::error::Error>> {
    let store = DuckDbIncidentStore::open(db_path)?;
    log::info!("{} incidents in {}", store.count()?, db_path.display());

    Ok(Arc::new(HazardService::new(
        Arc::new(store),
        Arc::new(FileModelStore::new(model_dir)),
        Arc::new(SystemClock),
    )))
}

fn print_json(value: &impl Serialize) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
