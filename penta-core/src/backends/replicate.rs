use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use super::http::{content_type, ensure_success, require_credential, transport_error};
use crate::{format_from_content_type, GenerationBackend, GenerationError, GenerationParams, RawOutput};

pub const DEFAULT_REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_REPLICATE_MODEL: &str = "black-forest-labs/flux-schnell";
pub const DEFAULT_REPLICATE_TIMEOUT: Duration = Duration::from_secs(120);
pub const REPLICATE_TOKEN_VAR: &str = "REPLICATE_API_TOKEN";

const BACKEND: &str = "replicate";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Serialize)]
struct CreatePrediction<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    input: Input<'a>,
}

#[derive(Serialize)]
struct Input<'a> {
    prompt: &'a str,
    num_inference_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    output_format: &'static str,
}

#[derive(Deserialize, Debug)]
struct Prediction {
    #[serde(default)]
    id: String,
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
    urls: Option<PredictionUrls>,
}

#[derive(Deserialize, Debug)]
struct PredictionUrls {
    get: Option<String>,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }
}

/// Replicate's hosted-model API: create a prediction, wait for it to finish
/// server-side, then download the first output image.
pub struct ReplicateBackend {
    http: reqwest::Client,
    api_base: String,
    model: String,
    token: Option<String>,
    timeout: Duration,
    poll_interval: Duration,
}

impl ReplicateBackend {
    pub fn new(api_base: &str, model: &str, token: Option<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            token,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// `owner/name` runs the model's latest version; `owner/name:version`
    /// pins one.
    fn create_endpoint(&self) -> (String, Option<&str>) {
        match self.model.split_once(':') {
            Some((_, version)) => (format!("{}/predictions", self.api_base), Some(version)),
            None => (
                format!("{}/models/{}/predictions", self.api_base, self.model),
                None,
            ),
        }
    }

    async fn create(&self, token: &str, params: &GenerationParams) -> Result<Prediction, GenerationError> {
        let (endpoint, version) = self.create_endpoint();
        let body = CreatePrediction {
            version,
            input: Input {
                prompt: &params.prompt,
                num_inference_steps: params.num_inference_steps,
                seed: params.seed,
                output_format: "png",
            },
        };

        debug!(%endpoint, "creating replicate prediction");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(token)
            .header("Prefer", format!("wait={}", self.timeout.as_secs().clamp(1, 60)))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(BACKEND, self.timeout, e))?;
        parse_prediction(ensure_success(BACKEND, self.timeout, response).await?).await
    }

    async fn wait(
        &self,
        token: &str,
        mut prediction: Prediction,
        deadline: Instant,
    ) -> Result<Prediction, GenerationError> {
        while !prediction.is_terminal() {
            let poll_url = prediction
                .urls
                .as_ref()
                .and_then(|urls| urls.get.clone())
                .ok_or_else(|| GenerationError::upstream(BACKEND, "prediction has no poll URL"))?;
            if Instant::now() + self.poll_interval > deadline {
                return Err(GenerationError::UpstreamTimeout {
                    backend: BACKEND,
                    after: self.timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;

            debug!(id = %prediction.id, status = %prediction.status, "polling replicate prediction");
            let remaining = deadline.saturating_duration_since(Instant::now());
            let response = self
                .http
                .get(&poll_url)
                .bearer_auth(token)
                .timeout(remaining)
                .send()
                .await
                .map_err(|e| transport_error(BACKEND, self.timeout, e))?;
            prediction = parse_prediction(ensure_success(BACKEND, self.timeout, response).await?).await?;
        }
        Ok(prediction)
    }

    async fn download(&self, url: &str, deadline: Instant) -> Result<RawOutput, GenerationError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(GenerationError::UpstreamTimeout {
                backend: BACKEND,
                after: self.timeout,
            });
        }

        debug!(%url, "downloading replicate output");
        let response = self
            .http
            .get(url)
            .timeout(remaining)
            .send()
            .await
            .map_err(|e| transport_error(BACKEND, self.timeout, e))?;
        let response = ensure_success(BACKEND, self.timeout, response)
            .await
            .map_err(|e| match e {
                GenerationError::Upstream {
                    backend,
                    status,
                    message,
                } => GenerationError::Upstream {
                    backend,
                    status,
                    message: format!("image download failed: {message}"),
                },
                other => other,
            })?;
        let format = content_type(&response)
            .as_deref()
            .and_then(format_from_content_type);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(BACKEND, self.timeout, e))?;
        Ok(RawOutput::ImageBytes {
            bytes: bytes.to_vec(),
            format,
        })
    }
}

async fn parse_prediction(response: reqwest::Response) -> Result<Prediction, GenerationError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| GenerationError::upstream(BACKEND, e.to_string()))?;
    serde_json::from_slice(&body)
        .map_err(|e| GenerationError::upstream(BACKEND, format!("malformed prediction: {e}")))
}

/// Collects output URLs in order, whether the model returns a single URL or a
/// list of them.
fn output_urls(output: &Value) -> Vec<String> {
    match output {
        Value::String(url) if url.starts_with("http") => vec![url.clone()],
        Value::Array(items) => items.iter().flat_map(output_urls).collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl GenerationBackend for ReplicateBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn generate(&self, params: &GenerationParams) -> Result<RawOutput, GenerationError> {
        let token = require_credential(self.token.as_deref(), REPLICATE_TOKEN_VAR)?;
        let deadline = Instant::now() + self.timeout;

        let prediction = self.create(token, params).await?;
        let prediction = self.wait(token, prediction, deadline).await?;

        if prediction.status != "succeeded" {
            let reason = match &prediction.error {
                Value::String(message) => message.clone(),
                Value::Null => format!("prediction {}", prediction.status),
                other => other.to_string(),
            };
            return Err(GenerationError::upstream(BACKEND, reason));
        }

        let urls = output_urls(&prediction.output);
        let url = urls
            .first()
            .ok_or_else(|| GenerationError::upstream(BACKEND, "prediction returned no output URLs"))?;
        info!(id = %prediction.id, outputs = urls.len(), "replicate prediction succeeded");
        self.download(url, deadline).await
    }
}
