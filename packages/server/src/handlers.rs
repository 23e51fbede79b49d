//! HTTP handler functions for the hazard map API.

use actix_web::{HttpResponse, web};
use chrono::Utc;
use hazard_map_analytics::{TrainOutcome, retrain_in_background};
use hazard_map_incident_models::{IncidentPayload, IncidentRecord};
use hazard_map_server_models::{
    AnomaliesResponse, ApiError, ApiHealth, ClustersResponse, IncidentBatch, RetrainResponse,
    RiskZonesRequest, RiskZonesResponse,
};

use crate::AppState;

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let model = state.service.model();

    HttpResponse::Ok().json(ApiHealth {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        model_version: model.is_trained().then(|| model.version()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST /api/detect-anomalies`
///
/// Scores the submitted incidents against the active model and returns
/// the anomalous ones. Returns an empty list while no model is trained.
pub async fn detect_anomalies(
    state: web::Data<AppState>,
    body: web::Json<IncidentBatch>,
) -> HttpResponse {
    let incidents = match parse_incidents(body.into_inner().incidents) {
        Ok(incidents) => incidents,
        Err(response) => return response,
    };

    let service = state.service.clone();
    match web::block(move || service.detect_anomalies(&incidents)).await {
        Ok(Ok(anomalies)) => HttpResponse::Ok().json(AnomaliesResponse { anomalies }),
        Ok(Err(e)) => internal_error("Failed to detect anomalies", &e),
        Err(e) => internal_error("Failed to detect anomalies", &e),
    }
}

/// `POST /api/predict-risk-zones`
///
/// Scans a grid over the requested region and returns the high-risk
/// points.
pub async fn predict_risk_zones(
    state: web::Data<AppState>,
    body: web::Json<RiskZonesRequest>,
) -> HttpResponse {
    let bounds = body.into_inner().region_bounds;
    if !bounds.is_finite() {
        return HttpResponse::BadRequest()
            .json(ApiError::new("regionBounds must contain finite coordinates"));
    }

    let service = state.service.clone();
    match web::block(move || service.predict_risk_zones(&bounds)).await {
        Ok(Ok(predictions)) => HttpResponse::Ok().json(RiskZonesResponse { predictions }),
        Ok(Err(e)) => internal_error("Failed to predict risk zones", &e),
        Err(e) => internal_error("Failed to predict risk zones", &e),
    }
}

/// `POST /api/cluster-incidents`
///
/// Groups the submitted incidents into spatial hotspots.
pub async fn cluster_incidents(
    state: web::Data<AppState>,
    body: web::Json<IncidentBatch>,
) -> HttpResponse {
    let incidents = match parse_incidents(body.into_inner().incidents) {
        Ok(incidents) => incidents,
        Err(response) => return response,
    };

    let service = state.service.clone();
    match web::block(move || service.cluster_incidents(&incidents)).await {
        Ok(clusters) => HttpResponse::Ok().json(ClustersResponse { clusters }),
        Err(e) => internal_error("Failed to cluster incidents", &e),
    }
}

/// `POST /api/retrain-models`
///
/// Retrains the anomaly model on the full incident history. Too little
/// history is reported with `trained: false` rather than as an error.
pub async fn retrain_models(state: web::Data<AppState>) -> HttpResponse {
    match retrain_in_background(state.service.clone()).await {
        Ok(TrainOutcome::Trained {
            version,
            sample_count,
        }) => HttpResponse::Ok().json(RetrainResponse {
            message: "Models retrained successfully".to_string(),
            trained: true,
            version: Some(version),
            sample_count,
        }),
        Ok(TrainOutcome::InsufficientData {
            available,
            required,
        }) => {
            let model = state.service.model();
            HttpResponse::Ok().json(RetrainResponse {
                message: format!(
                    "Not enough incidents to train: {available} available, {required} required"
                ),
                trained: false,
                version: model.is_trained().then(|| model.version()),
                sample_count: available,
            })
        }
        Err(e) => internal_error("Failed to retrain models", &e),
    }
}

/// Validates every payload, or returns a 400 response naming the first
/// invalid entry.
fn parse_incidents(payloads: Vec<IncidentPayload>) -> Result<Vec<IncidentRecord>, HttpResponse> {
    payloads
        .into_iter()
        .enumerate()
        .map(|(index, payload)| {
            let id = payload.id.clone();
            IncidentRecord::try_from(payload).map_err(|e| {
                log::debug!("Rejected incident {index} ({id}): {e}");
                HttpResponse::BadRequest().json(ApiError::new(format!(
                    "Invalid incident at index {index} ({id}): {e}"
                )))
            })
        })
        .collect()
}

fn internal_error(message: &str, error: &dyn std::fmt::Display) -> HttpResponse {
    log::error!("{message}: {error}");
    HttpResponse::InternalServerError().json(ApiError::new(message))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::http::header::ContentType;
    use actix_web::{App, test};
    use chrono::{Duration, TimeZone};
    use hazard_map_analytics::{
        BoxError, FixedClock, HazardService, InMemoryIncidentSource, InMemoryModelStore,
        IncidentSource,
    };
    use hazard_map_incident_models::IncidentCategory;
    use serde_json::{Value, json};

    use super::*;
    use crate::configure;

    struct FailingSource;

    impl IncidentSource for FailingSource {
        fn fetch_all(&self) -> Result<Vec<IncidentRecord>, BoxError> {
            Err("database is locked".into())
        }

        fn fetch_near(&self, _: f64, _: f64, _: f64) -> Result<Vec<IncidentRecord>, BoxError> {
            Err("database is locked".into())
        }
    }

    fn history(n: u32) -> Vec<IncidentRecord> {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        (0..n)
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
            .collect()
    }

    fn state_with(source: Arc<dyn IncidentSource>) -> web::Data<AppState> {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        web::Data::new(AppState {
            service: Arc::new(HazardService::new(
                source,
                Arc::new(InMemoryModelStore::new()),
                Arc::new(clock),
            )),
        })
    }

    fn state(incidents: Vec<IncidentRecord>) -> web::Data<AppState> {
        state_with(Arc::new(InMemoryIncidentSource::new(incidents)))
    }

    fn incident_json(id: &str, lat: f64, lng: f64) -> Value {
        json!({
            "id": id,
            "latitude": lat,
            "longitude": lng,
            "category": "flood",
            "severity": 3,
            "timestamp": "2024-05-20T14:00:00Z"
        })
    }

    #[actix_web::test]
    async fn health_reports_missing_model() {
        let app =
            test::init_service(App::new().app_data(state(Vec::new())).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert!(body["modelVersion"].is_null());
    }

    #[actix_web::test]
    async fn untrained_model_detects_nothing() {
        let app =
            test::init_service(App::new().app_data(state(Vec::new())).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/detect-anomalies")
            .set_json(json!({ "incidents": [incident_json("a", 36.7, 3.0)] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({ "anomalies": [] }));
    }

    #[actix_web::test]
    async fn invalid_incident_is_rejected_with_index() {
        let app =
            test::init_service(App::new().app_data(state(Vec::new())).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/detect-anomalies")
            .set_json(json!({
                "incidents": [incident_json("ok", 36.7, 3.0), incident_json("bad", 95.0, 3.0)]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        let error = body["error"].as_str().unwrap();
        assert!(error.contains("index 1"), "{error}");
        assert!(error.contains("bad"), "{error}");
    }

    #[actix_web::test]
    async fn malformed_json_gets_json_error() {
        let app =
            test::init_service(App::new().app_data(state(Vec::new())).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/cluster-incidents")
            .insert_header(ContentType::json())
            .set_payload("{\"incidents\": [")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    #[actix_web::test]
    async fn retrain_then_health_reports_version() {
        let app =
            test::init_service(App::new().app_data(state(history(40))).configure(configure)).await;

        let req = test::TestRequest::post().uri("/api/retrain-models").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["trained"], true);
        assert_eq!(body["version"], 1);
        assert_eq!(body["sampleCount"], 40);

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["modelVersion"], 1);
    }

    #[actix_web::test]
    async fn retrain_with_little_history_is_not_an_error() {
        let app =
            test::init_service(App::new().app_data(state(history(4))).configure(configure)).await;

        let req = test::TestRequest::post().uri("/api/retrain-models").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["trained"], false);
        assert!(body["version"].is_null());
        assert_eq!(body["sampleCount"], 4);
    }

    #[actix_web::test]
    async fn source_failure_is_internal_error() {
        let app = test::init_service(
            App::new()
                .app_data(state_with(Arc::new(FailingSource)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/retrain-models").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Failed to retrain models");
    }

    #[actix_web::test]
    async fn clusters_nearby_incidents() {
        let app =
            test::init_service(App::new().app_data(state(Vec::new())).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/cluster-incidents")
            .set_json(json!({
                "incidents": [
                    incident_json("a", 36.750, 3.050),
                    incident_json("b", 36.752, 3.051),
                    incident_json("c", 36.751, 3.049),
                    incident_json("far", 30.0, 0.0)
                ]
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        let clusters = body["clusters"].as_array().unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0]["memberCount"], 3);
    }

    #[actix_web::test]
    async fn risk_zones_accept_snake_case_bounds() {
        let app =
            test::init_service(App::new().app_data(state(Vec::new())).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/predict-risk-zones")
            .set_json(json!({
                "region_bounds": { "lat_min": 35.0, "lat_max": 37.0, "lng_min": 2.0, "lng_max": 4.0 }
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({ "predictions": [] }));
    }

    #[actix_web::test]
    async fn missing_bounds_are_bad_request() {
        let app =
            test::init_service(App::new().app_data(state(Vec::new())).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/predict-risk-zones")
            .set_json(json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
