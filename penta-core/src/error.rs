use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Everything that can go wrong between receiving a prompt and producing an
/// envelope.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("prompt must not be empty")]
    MissingPrompt,
    #[error("invalid request body: {0}")]
    InvalidRequest(String),
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(&'static str),
    #[error("{backend} backend is unavailable: {reason}")]
    BackendUnavailable { backend: &'static str, reason: String },
    #[error("{backend} did not respond within {after:?}")]
    UpstreamTimeout {
        backend: &'static str,
        after: Duration,
    },
    #[error("{backend} upstream error{}: {message}", status_suffix(.status))]
    Upstream {
        backend: &'static str,
        status: Option<u16>,
        message: String,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Stable, serializable discriminant of [`GenerationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingPrompt,
    InvalidRequest,
    MissingCredential,
    BackendUnavailable,
    UpstreamTimeout,
    UpstreamError,
    InternalError,
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingPrompt => ErrorKind::MissingPrompt,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::MissingCredential(_) => ErrorKind::MissingCredential,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            Self::Upstream { .. } => ErrorKind::UpstreamError,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// HTTP status the upstream answered with, when there was one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => *status,
            _ => None,
        }
    }

    pub(crate) fn upstream(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            backend,
            status: None,
            message: message.into(),
        }
    }

    pub(crate) fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for GenerationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}
