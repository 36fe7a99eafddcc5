use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use anyhow::Result;
use tracing::info;

use crate::backends::{
    craiyon::{DEFAULT_CRAIYON_TIMEOUT, DEFAULT_CRAIYON_URL},
    huggingface::{DEFAULT_HF_API_BASE, DEFAULT_HF_MODEL, DEFAULT_HF_TIMEOUT, HF_TOKEN_VAR},
    replicate::{
        DEFAULT_REPLICATE_API_BASE, DEFAULT_REPLICATE_MODEL, DEFAULT_REPLICATE_TIMEOUT,
        REPLICATE_TOKEN_VAR,
    },
    CraiyonBackend, HuggingFaceBackend, MockBackend, PipelineBackend, ReplicateBackend,
};
use crate::flux::DEFAULT_FLUX_MODEL;
use crate::{DeviceMap, FluxLoader, GenerationBackend, InitPolicy};

const HF_TOKEN_FALLBACK_VAR: &str = "HUGGINGFACEHUB_API_TOKEN";

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Mock,
    Craiyon,
    HuggingFace,
    Diffusion,
    Replicate,
}

impl BackendKind {
    /// Detect backend from its name or a common alias.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "mock" | "fake" => Some(Self::Mock),
            "craiyon" => Some(Self::Craiyon),
            "huggingface" | "hugging-face" | "hf" => Some(Self::HuggingFace),
            "diffusion" | "diffusers" | "flux" => Some(Self::Diffusion),
            "replicate" => Some(Self::Replicate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Craiyon => "craiyon",
            Self::HuggingFace => "huggingface",
            Self::Diffusion => "diffusion",
            Self::Replicate => "replicate",
        }
    }

    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            Self::Mock | Self::Craiyon => None,
            Self::HuggingFace => Some(DEFAULT_HF_MODEL),
            Self::Diffusion => Some(DEFAULT_FLUX_MODEL),
            Self::Replicate => Some(DEFAULT_REPLICATE_MODEL),
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        match self {
            Self::Mock | Self::Diffusion => None,
            Self::Craiyon => Some(DEFAULT_CRAIYON_TIMEOUT),
            Self::HuggingFace => Some(DEFAULT_HF_TIMEOUT),
            Self::Replicate => Some(DEFAULT_REPLICATE_TIMEOUT),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            format!(
                "unknown backend '{s}', expected one of: mock, craiyon, huggingface, diffusion, replicate"
            )
        })
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tokens read once from the environment at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    pub hugging_face: Option<String>,
    pub replicate: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            hugging_face: non_empty_env(HF_TOKEN_VAR).or_else(|| non_empty_env(HF_TOKEN_FALLBACK_VAR)),
            replicate: non_empty_env(REPLICATE_TOKEN_VAR),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("hugging_face", &self.hugging_face.as_ref().map(|_| "<set>"))
            .field("replicate", &self.replicate.as_ref().map(|_| "<set>"))
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Everything needed to construct the process's single backend.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Model id; the backend's default when unset.
    pub model: Option<String>,
    /// Upstream URL (Craiyon) or API base (Hugging Face, Replicate).
    pub endpoint: Option<String>,
    pub timeout: Option<Duration>,
    pub init_policy: InitPolicy,
    pub device_map: DeviceMap,
    pub credentials: Credentials,
}

impl BackendConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    fn model(&self) -> &str {
        self.model
            .as_deref()
            .or(self.kind.default_model())
            .unwrap_or_default()
    }

    fn endpoint_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.endpoint.as_deref().unwrap_or(default)
    }

    fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

/// Builds the backend named by `config`.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn GenerationBackend>> {
    info!(
        backend = %config.kind,
        model = config.model(),
        endpoint = ?config.endpoint,
        "configuring generation backend"
    );

    let backend: Arc<dyn GenerationBackend> = match config.kind {
        BackendKind::Mock => Arc::new(MockBackend),
        BackendKind::Craiyon => Arc::new(CraiyonBackend::new(
            config.endpoint_or(DEFAULT_CRAIYON_URL),
            config.timeout_or(DEFAULT_CRAIYON_TIMEOUT),
        )),
        BackendKind::HuggingFace => Arc::new(HuggingFaceBackend::new(
            config.endpoint_or(DEFAULT_HF_API_BASE),
            config.model(),
            config.credentials.hugging_face.clone(),
            config.timeout_or(DEFAULT_HF_TIMEOUT),
        )),
        BackendKind::Diffusion => Arc::new(PipelineBackend::new(
            FluxLoader::new(config.model(), config.device_map),
            config.init_policy,
        )),
        BackendKind::Replicate => Arc::new(ReplicateBackend::new(
            config.endpoint_or(DEFAULT_REPLICATE_API_BASE),
            config.model(),
            config.credentials.replicate.clone(),
            config.timeout_or(DEFAULT_REPLICATE_TIMEOUT),
        )),
    };

    Ok(backend)
}
