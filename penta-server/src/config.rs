use std::time::Duration;

use clap::Parser;
use penta_core::{BackendConfig, BackendKind, Credentials, DeviceMap, InitPolicy};

/// Command line arguments, each with a `PENTA_*` environment fallback.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Penta prompt-to-generation server")]
pub struct Args {
    /// Generation backend: mock, craiyon, huggingface, diffusion or replicate
    #[arg(long, env = "PENTA_BACKEND", default_value = "mock")]
    pub backend: BackendKind,

    /// Model id (hub id for diffusion/huggingface, owner/name[:version] for replicate)
    #[arg(long, env = "PENTA_MODEL")]
    pub model: Option<String>,

    /// Override the upstream URL (craiyon) or API base (huggingface, replicate)
    #[arg(long, env = "PENTA_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Per-call upstream timeout in seconds
    #[arg(long, env = "PENTA_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// What to do after a failed model load: fail-fast or retry
    #[arg(long, env = "PENTA_INIT_POLICY", default_value = "fail-fast")]
    pub init_policy: InitPolicy,

    /// Load the model at startup instead of on the first request
    #[arg(long, env = "PENTA_EAGER_LOAD")]
    pub eager_load: bool,

    /// Use CPU instead of GPU
    #[arg(long, env = "PENTA_CPU")]
    pub cpu: bool,

    /// Host address to bind the server to
    #[arg(long, env = "PENTA_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "PENTA_PORT", default_value_t = 8000)]
    pub port: u16,
}

impl Args {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Backend configuration, with credentials read from the environment.
    pub fn backend_config(&self) -> BackendConfig {
        self.backend_config_with(Credentials::from_env())
    }

    pub fn backend_config_with(&self, credentials: Credentials) -> BackendConfig {
        BackendConfig {
            kind: self.backend,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
            init_policy: self.init_policy,
            device_map: DeviceMap::from_cpu_flag(self.cpu),
            credentials,
        }
    }
}
