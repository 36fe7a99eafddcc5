pub mod config;
pub mod error;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use penta_core::{encode, GenerationBackend, GenerationError, GenerationRequest, GenerationResult};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{status_for, ApiError};

/// Application state: the one backend this process serves.
#[derive(Clone)]
pub struct AppState(pub Arc<dyn GenerationBackend>);

#[derive(Serialize)]
struct Liveness {
    status: &'static str,
    message: &'static str,
    backend: &'static str,
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(Liveness {
        status: "ok",
        message: "penta server is running",
        backend: state.0.name(),
    })
}

async fn generate_handler(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResult>, ApiError> {
    let Json(request) =
        payload.map_err(|rejection| GenerationError::InvalidRequest(rejection.body_text()))?;
    generate(request, state.0.as_ref()).await.map(Json).map_err(ApiError)
}

/// validate -> adapter -> encode. Validation failures never reach the backend.
pub async fn generate(
    request: GenerationRequest,
    backend: &dyn GenerationBackend,
) -> Result<GenerationResult, GenerationError> {
    let params = request.validate()?;
    info!(backend = backend.name(), prompt_chars = params.prompt.chars().count(), "generating");
    let output = backend.generate(&params).await?;
    encode(params.prompt, output)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/generate", post(generate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
