use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use penta_core::{ErrorKind, GenerationError, Status};
use serde::Serialize;
use tracing::{error, warn};

/// The one place error kinds become HTTP statuses.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MissingPrompt => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::MissingCredential => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::UpstreamError => StatusCode::BAD_GATEWAY,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    status: Status,
    kind: ErrorKind,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
}

/// A [`GenerationError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub GenerationError);

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!(?kind, status = status.as_u16(), "generation failed: {}", self.0);
        } else {
            warn!(?kind, status = status.as_u16(), "rejected request: {}", self.0);
        }

        let envelope = ErrorEnvelope {
            status: Status::Error,
            kind,
            detail: self.0.to_string(),
            upstream_status: self.0.upstream_status(),
        };
        (status, Json(envelope)).into_response()
    }
}
