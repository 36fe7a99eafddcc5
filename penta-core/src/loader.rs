use std::{future::Future, str::FromStr, sync::Arc};

use anyhow::Result;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::GenerationError;

/// Builds a heavyweight model. Implementors carry whatever configuration the
/// load needs (model id, device placement).
pub trait Loader: Send + Sync {
    type Model: Send + Sync + 'static;

    fn load(&self) -> impl Future<Output = Result<Self::Model>> + Send;

    /// Human-readable identifier used in logs.
    fn describe(&self) -> String;
}

/// What a [`ModelHandle`] does after a failed load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitPolicy {
    /// Remember the failure; every later request is told the backend is
    /// unavailable without another attempt.
    #[default]
    FailFast,
    /// Leave the handle empty so the next request tries again.
    Retry,
}

impl FromStr for InitPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" | "fatal" => Ok(Self::FailFast),
            "retry" => Ok(Self::Retry),
            other => Err(format!(
                "unknown init policy '{other}', expected 'fail-fast' or 'retry'"
            )),
        }
    }
}

/// Process-lifetime handle to a lazily loaded model.
///
/// Loading is guarded by a [`OnceCell`]: concurrent first callers wait on a
/// single in-flight load instead of each starting their own.
pub struct ModelHandle<L: Loader> {
    backend: &'static str,
    loader: L,
    policy: InitPolicy,
    cell: OnceCell<std::result::Result<Arc<L::Model>, String>>,
}

impl<L: Loader> ModelHandle<L> {
    pub fn new(backend: &'static str, loader: L, policy: InitPolicy) -> Self {
        Self {
            backend,
            loader,
            policy,
            cell: OnceCell::new(),
        }
    }

    pub fn policy(&self) -> InitPolicy {
        self.policy
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }

    /// Returns the model, loading it first if nobody has yet.
    pub async fn get(&self) -> Result<Arc<L::Model>, GenerationError> {
        let slot = match self.policy {
            InitPolicy::FailFast => {
                self.cell
                    .get_or_init(|| async { self.load().await.map_err(|e| format!("{e:#}")) })
                    .await
            }
            InitPolicy::Retry => self
                .cell
                .get_or_try_init(|| async { self.load().await.map(Ok) })
                .await
                .map_err(|e| self.unavailable(format!("{e:#}")))?,
        };

        slot.as_ref()
            .map(Arc::clone)
            .map_err(|reason| self.unavailable(reason.clone()))
    }

    async fn load(&self) -> Result<Arc<L::Model>> {
        let target = self.loader.describe();
        info!(backend = self.backend, %target, "loading model");
        match self.loader.load().await {
            Ok(model) => {
                info!(backend = self.backend, %target, "model loaded");
                Ok(Arc::new(model))
            }
            Err(e) => {
                error!(backend = self.backend, %target, policy = ?self.policy, "model load failed: {e:#}");
                Err(e)
            }
        }
    }

    fn unavailable(&self, reason: String) -> GenerationError {
        GenerationError::BackendUnavailable {
            backend: self.backend,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    struct CountingLoader {
        attempts: Arc<AtomicUsize>,
        failures_before_success: usize,
    }

    impl CountingLoader {
        fn new(failures_before_success: usize) -> (Self, Arc<AtomicUsize>) {
            let attempts = Arc::new(AtomicUsize::new(0));
            let loader = Self {
                attempts: attempts.clone(),
                failures_before_success,
            };
            (loader, attempts)
        }
    }

    impl Loader for CountingLoader {
        type Model = usize;

        async fn load(&self) -> Result<usize> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if attempt < self.failures_before_success {
                anyhow::bail!("weights not found (attempt {attempt})");
            }
            Ok(attempt)
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[tokio::test]
    async fn concurrent_first_access_loads_once() {
        let (loader, attempts) = CountingLoader::new(0);
        let handle = Arc::new(ModelHandle::new("test", loader, InitPolicy::FailFast));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.get().await.map(|m| *m) })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 0);
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(handle.is_loaded());
    }

    #[tokio::test]
    async fn fail_fast_remembers_the_failure() {
        let (loader, attempts) = CountingLoader::new(1);
        let handle = ModelHandle::new("test", loader, InitPolicy::FailFast);

        for _ in 0..3 {
            let err = handle.get().await.unwrap_err();
            assert!(matches!(err, GenerationError::BackendUnavailable { .. }));
            assert!(err.to_string().contains("weights not found"));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!handle.is_loaded());
    }

    #[tokio::test]
    async fn retry_attempts_again_after_failure() {
        let (loader, attempts) = CountingLoader::new(2);
        let handle = ModelHandle::new("test", loader, InitPolicy::Retry);

        assert!(handle.get().await.is_err());
        assert!(handle.get().await.is_err());
        assert_eq!(*handle.get().await.unwrap(), 2);
        assert_eq!(*handle.get().await.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn init_policy_parses() {
        assert_eq!("fail-fast".parse::<InitPolicy>(), Ok(InitPolicy::FailFast));
        assert_eq!("RETRY".parse::<InitPolicy>(), Ok(InitPolicy::Retry));
        assert!("sometimes".parse::<InitPolicy>().is_err());
    }
}
