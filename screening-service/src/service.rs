use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::ScreeningConfig,
    error::FailureTag,
    models::{AnalysisRequest, PatientDetails, PipelineRecord, generate_patient_id},
    workflow::ScreeningPipeline,
};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn status_for(tag: FailureTag) -> StatusCode {
    match tag {
        FailureTag::InvalidInput => StatusCode::BAD_REQUEST,
        FailureTag::BackendUnavailable | FailureTag::MalformedResponse => StatusCode::BAD_GATEWAY,
        FailureTag::CompileFailure | FailureTag::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error response for a run that ended in `Failed`, or `None` if it completed
fn run_failure(record: &PipelineRecord) -> Option<ApiError> {
    let failure = record.failure.as_ref()?;
    Some((
        status_for(failure.tag),
        Json(json!({
            "error": failure.tag,
            "details": failure.message,
            "run_id": record.run_id
        })),
    ))
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ScreeningPipeline>,
}

/// JSON body accepted by both screening endpoints
#[derive(Debug, Deserialize)]
pub struct AnalyzeImageRequest {
    /// Base64 image bytes, optionally as a `data:` URL
    pub image_base64: String,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub patient_context: Option<String>,
    #[serde(default)]
    pub patient: Option<PatientDetails>,
}

impl AnalyzeImageRequest {
    fn into_analysis_request(self) -> Result<AnalysisRequest, ApiError> {
        let encoded = match self.image_base64.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => self.image_base64.as_str(),
        };
        let image = STANDARD
            .decode(encoded.trim())
            .map_err(|e| bad_request_error("image_base64 is not valid base64", &e.to_string()))?;

        let mut request = AnalysisRequest::new(image);
        request.patient_context = self.patient_context;
        request.patient_id = self.patient_id.filter(|id| !id.trim().is_empty());
        if request.patient_id.is_none() && self.patient.is_some() {
            request.patient_id = Some(generate_patient_id(Utc::now()));
        }
        request.patient = self.patient;
        Ok(request)
    }
}

pub fn create_app(config: &ScreeningConfig) -> Router {
    let pipeline = Arc::new(ScreeningPipeline::from_config(config));
    build_router(AppState { pipeline })
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/screening/analyze", post(analyze))
        .route("/screening/report", post(report))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(correlation_id_middleware))
        .with_state(app_state)
}

/// Tag every request with an id, reusing the caller's `x-correlation-id` when present
async fn correlation_id_middleware(req: Request<Body>, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Leukemia Screening Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Blood cell image screening: classification, clinical advisory and report",
        "endpoints": {
            "POST /screening/analyze": "Run the screening pipeline and return the full record",
            "POST /screening/report": "Run the screening pipeline and return the HTML report",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn run_pipeline(
    state: &AppState,
    request: AnalyzeImageRequest,
) -> Result<PipelineRecord, ApiError> {
    let request = request.into_analysis_request()?;
    info!(
        image_bytes = request.image.len(),
        patient_id = ?request.patient_id,
        "Screening request received"
    );

    let record = state.pipeline.run(request).await;
    if let Some(err) = run_failure(&record) {
        warn!(run_id = %record.run_id, status = %err.0, "Screening request failed");
        return Err(err);
    }
    Ok(record)
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeImageRequest>,
) -> Result<Json<PipelineRecord>, ApiError> {
    run_pipeline(&state, request).await.map(Json)
}

async fn report(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeImageRequest>,
) -> Result<Response, ApiError> {
    let record = run_pipeline(&state, request).await?;
    match record.report_document {
        Some(document) => {
            Ok(([(header::CONTENT_TYPE, document.content_type)], document.body).into_response())
        }
        None => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": FailureTag::CompileFailure,
                "details": "run completed without a report",
                "run_id": record.run_id
            })),
        )),
    }
}
