pub mod backend_factory;
pub mod backends;
pub mod device_map;
pub mod encode;
pub mod error;
pub mod loader;
mod util;

mod flux;

use async_trait::async_trait;
pub use backend_factory::*;
pub use device_map::*;
pub use encode::*;
pub use error::*;
pub use flux::{FluxLoader, FluxModel, FluxVariant};
use image::DynamicImage;
pub use loader::*;
use serde::{Deserialize, Serialize};
pub(crate) use util::*;

pub const DEFAULT_MAX_LENGTH: usize = 100;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_INFERENCE_STEPS: usize = 4;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 0.0;

/// Body of `POST /generate`.
///
/// `prompt` is optional at the serde level so that a missing field is reported
/// as [`GenerationError::MissingPrompt`] by [`GenerationRequest::validate`]
/// rather than as a JSON decoding failure.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, PartialOrd)]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    pub max_length: Option<usize>,
    pub temperature: Option<f64>,
    pub num_inference_steps: Option<usize>,
    pub guidance_scale: Option<f64>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    /// Rejects an absent or empty prompt and fills in the documented defaults.
    /// Any non-empty string is accepted as-is, whitespace included.
    pub fn validate(self) -> Result<GenerationParams, GenerationError> {
        let prompt = match self.prompt {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => return Err(GenerationError::MissingPrompt),
        };

        Ok(GenerationParams {
            prompt,
            max_length: self.max_length.unwrap_or(DEFAULT_MAX_LENGTH),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            num_inference_steps: self.num_inference_steps.unwrap_or(DEFAULT_INFERENCE_STEPS),
            guidance_scale: self.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE),
            width: self.width,
            height: self.height,
            seed: self.seed,
        })
    }
}

/// A validated request with defaults applied. Adapters only ever see this.
#[derive(Serialize, Debug, Clone, PartialEq, PartialOrd)]
pub struct GenerationParams {
    pub prompt: String,
    pub max_length: usize,
    pub temperature: f64,
    pub num_inference_steps: usize,
    pub guidance_scale: f64,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub seed: Option<u64>,
}

/// One generation backend. Exactly one is selected per process and injected
/// into the HTTP layer.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, params: &GenerationParams) -> Result<RawOutput, GenerationError>;

    /// Loads anything heavyweight ahead of the first request.
    async fn warm_up(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

/// An in-process image pipeline.
pub trait ModelLike: Send + Sync {
    fn run(&self, params: &GenerationParams) -> anyhow::Result<DynamicImage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_applies_defaults() {
        let params = GenerationRequest::new("a red fox").validate().unwrap();
        assert_eq!(params.prompt, "a red fox");
        assert_eq!(params.max_length, 100);
        assert_eq!(params.temperature, 1.0);
        assert_eq!(params.num_inference_steps, 4);
        assert_eq!(params.guidance_scale, 0.0);
        assert_eq!(params.width, None);
        assert_eq!(params.seed, None);
    }

    #[test]
    fn validate_keeps_supplied_values() {
        let request = GenerationRequest {
            max_length: Some(32),
            temperature: Some(0.7),
            num_inference_steps: Some(2),
            guidance_scale: Some(3.5),
            width: Some(512),
            height: Some(512),
            seed: Some(42),
            ..GenerationRequest::new("x")
        };
        let params = request.validate().unwrap();
        assert_eq!(params.max_length, 32);
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.num_inference_steps, 2);
        assert_eq!(params.guidance_scale, 3.5);
        assert_eq!(params.width, Some(512));
        assert_eq!(params.seed, Some(42));
    }

    #[test]
    fn missing_or_empty_prompt_is_rejected() {
        for request in [GenerationRequest::default(), GenerationRequest::new("")] {
            assert!(matches!(
                request.validate(),
                Err(GenerationError::MissingPrompt)
            ));
        }
    }

    #[test]
    fn whitespace_prompt_is_kept_verbatim() {
        let params = GenerationRequest::new("   \n").validate().unwrap();
        assert_eq!(params.prompt, "   \n");
    }

    #[test]
    fn missing_prompt_field_still_deserializes() {
        let request: GenerationRequest = serde_json::from_str(r#"{"temperature":0.5}"#).unwrap();
        assert_eq!(request.prompt, None);
        assert_eq!(request.temperature, Some(0.5));
    }
}
