use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{content_type, ensure_success, is_image, transport_error};
use crate::{format_from_content_type, GenerationBackend, GenerationError, GenerationParams, RawOutput};

pub const DEFAULT_CRAIYON_URL: &str = "https://backend.craiyon.com/generate";
pub const DEFAULT_CRAIYON_TIMEOUT: Duration = Duration::from_secs(240);

const BACKEND: &str = "craiyon";

#[derive(Serialize)]
struct Payload<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    images: Vec<String>,
}

/// Craiyon's free, unauthenticated image endpoint.
pub struct CraiyonBackend {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl CraiyonBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

impl Default for CraiyonBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CRAIYON_URL, DEFAULT_CRAIYON_TIMEOUT)
    }
}

#[async_trait]
impl GenerationBackend for CraiyonBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn generate(&self, params: &GenerationParams) -> Result<RawOutput, GenerationError> {
        debug!(url = %self.url, "requesting craiyon image");
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&Payload {
                prompt: &params.prompt,
            })
            .send()
            .await
            .map_err(|e| transport_error(BACKEND, self.timeout, e))?;
        let response = ensure_success(BACKEND, self.timeout, response).await?;

        let content_type = content_type(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(BACKEND, self.timeout, e))?;

        if is_image(content_type.as_deref()) {
            return Ok(RawOutput::ImageBytes {
                bytes: body.to_vec(),
                format: content_type.as_deref().and_then(format_from_content_type),
            });
        }

        let parsed: Response = serde_json::from_slice(&body).map_err(|e| {
            GenerationError::upstream(BACKEND, format!("malformed response body: {e}"))
        })?;
        parsed
            .images
            .into_iter()
            .next()
            .map(RawOutput::ImageBase64)
            .ok_or_else(|| GenerationError::upstream(BACKEND, "response contained no images"))
    }
}
