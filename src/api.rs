use crate::classifier::{ Classification, LabelScorer };
use crate::stats::Stats;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{ get, post },
    Json,
    Router,
};
use serde::{ Deserialize, Serialize };
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{ debug, info, warn };

// ─────────────────────────────────────────────────────────────────────
//  JSON request / response types
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
    pub labels: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
pub struct AppState {
    pub scorer: Arc<dyn LabelScorer>,
    pub stats: Arc<Stats>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

// ─────────────────────────────────────────────────────────────────────
//  Handlers
// ─────────────────────────────────────────────────────────────────────

/// `POST /classify`: best label for `text` among `labels`.
///
/// Inference runs on the blocking pool; the model is CPU bound.
async fn classify(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>
) -> Result<Json<Classification>, ApiError> {
    if req.labels.iter().all(|l| l.trim().is_empty()) {
        state.stats.record_bad_request();
        return Err(api_error(StatusCode::BAD_REQUEST, "provide at least one non-empty label"));
    }

    let started = Instant::now();
    let scorer = state.scorer.clone();
    let ClassifyRequest { text, labels } = req;
    let result = tokio::task
        ::spawn_blocking(move || scorer.classify(&text, &labels)).await
        .map_err(|e| {
            state.stats.record_failure();
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("classifier task failed: {e}"))
        })?;

    match result {
        Ok(classification) => {
            let took = started.elapsed();
            state.stats.record_classified(took);
            debug!(
                label = %classification.label,
                candidates = classification.labels.len(),
                took_ms = took.as_millis() as u64,
                "🏷️  classified"
            );
            Ok(Json(classification))
        }
        Err(e) => {
            state.stats.record_failure();
            warn!(error = %e, "classification failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// `GET /health`: simple health check.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ─────────────────────────────────────────────────────────────────────
//  Server bootstrap
// ─────────────────────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/classify", post(classify))
        .with_state(state)
}

/// Start the REST API server.  Returns the `JoinHandle` so the caller
/// can select on it alongside Ctrl-C.
pub async fn start_api_server(
    host: &str,
    port: u16,
    state: AppState
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = build_router(state);

    let listener = TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;
    info!(addr = %addr, "🌐 gesture classifier listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "REST API server error");
        }
    });

    Ok(handle)
}
