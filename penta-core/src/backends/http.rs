use std::time::Duration;

use reqwest::{header::CONTENT_TYPE, Response};
use serde_json::Value;
use tracing::warn;

use crate::GenerationError;

const MAX_ERROR_BODY: usize = 512;

/// Returns the credential or fails before anything goes on the wire.
pub(crate) fn require_credential<'a>(
    token: Option<&'a str>,
    env_var: &'static str,
) -> Result<&'a str, GenerationError> {
    token
        .filter(|t| !t.trim().is_empty())
        .ok_or(GenerationError::MissingCredential(env_var))
}

/// Classifies a transport-level failure.
pub(crate) fn transport_error(
    backend: &'static str,
    timeout: Duration,
    err: reqwest::Error,
) -> GenerationError {
    if err.is_timeout() {
        warn!(backend, ?timeout, "upstream timed out");
        GenerationError::UpstreamTimeout {
            backend,
            after: timeout,
        }
    } else {
        warn!(backend, "upstream transport error: {err}");
        GenerationError::upstream(backend, err.to_string())
    }
}

/// Passes 2xx responses through; turns anything else into an upstream error
/// carrying the status and whatever message the body holds.
pub(crate) async fn ensure_success(
    backend: &'static str,
    timeout: Duration,
    response: Response,
) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .map_err(|e| transport_error(backend, timeout, e))?;
    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    warn!(backend, status = status.as_u16(), "upstream rejected request: {message}");

    Err(GenerationError::Upstream {
        backend,
        status: Some(status.as_u16()),
        message,
    })
}

pub(crate) fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub(crate) fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.contains("json"))
}

pub(crate) fn is_image(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.trim_start().starts_with("image/"))
}

/// Pulls a human-readable message out of an error body: the `error` or
/// `detail` field of a JSON object, else the (truncated) text itself.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        for key in ["error", "detail", "message"] {
            match value.get(key) {
                Some(Value::String(message)) => return Some(message.clone()),
                Some(other @ (Value::Object(_) | Value::Array(_))) => {
                    return Some(other.to_string())
                }
                _ => {}
            }
        }
    }
    Some(truncate(trimmed, MAX_ERROR_BODY))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
