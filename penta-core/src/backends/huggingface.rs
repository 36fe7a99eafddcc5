use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::http::{
    content_type, ensure_success, is_image, is_json, require_credential, transport_error,
};
use crate::{format_from_content_type, GenerationBackend, GenerationError, GenerationParams, RawOutput};

pub const DEFAULT_HF_API_BASE: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_HF_MODEL: &str = "black-forest-labs/FLUX.1-schnell";
pub const DEFAULT_HF_TIMEOUT: Duration = Duration::from_secs(120);
pub const HF_TOKEN_VAR: &str = "HF_TOKEN";

const BACKEND: &str = "huggingface";

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: Parameters,
}

#[derive(Serialize)]
struct Parameters {
    num_inference_steps: usize,
    guidance_scale: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

/// Text-to-image through the Hugging Face Inference API. The endpoint answers
/// with the encoded image itself.
pub struct HuggingFaceBackend {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HuggingFaceBackend {
    /// `api_base` is joined with `model` to form the endpoint.
    pub fn new(api_base: &str, model: &str, token: Option<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/{}", api_base.trim_end_matches('/'), model),
            token,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl GenerationBackend for HuggingFaceBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn generate(&self, params: &GenerationParams) -> Result<RawOutput, GenerationError> {
        let token = require_credential(self.token.as_deref(), HF_TOKEN_VAR)?;

        let request = InferenceRequest {
            inputs: &params.prompt,
            parameters: Parameters {
                num_inference_steps: params.num_inference_steps,
                guidance_scale: params.guidance_scale,
                width: params.width,
                height: params.height,
                seed: params.seed,
            },
        };

        debug!(url = %self.url, "requesting hugging face inference");
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "image/png")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(BACKEND, self.timeout, e))?;
        let response = ensure_success(BACKEND, self.timeout, response).await?;

        let content_type = content_type(&response);
        if is_json(content_type.as_deref()) {
            let body = response
                .text()
                .await
                .map_err(|e| transport_error(BACKEND, self.timeout, e))?;
            return Err(GenerationError::upstream(
                BACKEND,
                format!("expected image bytes, got JSON: {body}"),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(BACKEND, self.timeout, e))?;
        if bytes.is_empty() {
            return Err(GenerationError::upstream(BACKEND, "empty response body"));
        }

        // Proxies and captcha pages answer 200 with HTML; only trust bytes that
        // are labelled as an image or decode as one.
        let format = match content_type.as_deref() {
            Some(ct) if is_image(Some(ct)) => format_from_content_type(ct),
            other => match image::guess_format(&bytes) {
                Ok(format) => format.extensions_str().first().map(|ext| ext.to_string()),
                Err(_) => {
                    return Err(GenerationError::upstream(
                        BACKEND,
                        format!(
                            "expected image bytes, got {}",
                            other.unwrap_or("a body without content type")
                        ),
                    ))
                }
            },
        };

        Ok(RawOutput::ImageBytes {
            bytes: bytes.to_vec(),
            format,
        })
    }
}
