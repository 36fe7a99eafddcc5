use async_trait::async_trait;
use tracing::{debug, error};

use crate::{
    GenerationBackend, GenerationError, GenerationParams, InitPolicy, Loader, ModelHandle,
    ModelLike, RawOutput,
};

/// Runs an in-process pipeline behind a lazily initialized [`ModelHandle`].
pub struct PipelineBackend<L: Loader> {
    handle: ModelHandle<L>,
}

impl<L> PipelineBackend<L>
where
    L: Loader,
    L::Model: ModelLike,
{
    pub fn new(loader: L, policy: InitPolicy) -> Self {
        Self {
            handle: ModelHandle::new("diffusion", loader, policy),
        }
    }

    pub fn handle(&self) -> &ModelHandle<L> {
        &self.handle
    }
}

#[async_trait]
impl<L> GenerationBackend for PipelineBackend<L>
where
    L: Loader,
    L::Model: ModelLike,
{
    fn name(&self) -> &'static str {
        "diffusion"
    }

    async fn generate(&self, params: &GenerationParams) -> Result<RawOutput, GenerationError> {
        let model = self.handle.get().await?;
        let params = params.clone();

        debug!(steps = params.num_inference_steps, guidance = params.guidance_scale, "running pipeline");
        let image = tokio::task::spawn_blocking(move || model.run(&params))
            .await
            .map_err(GenerationError::internal)?
            .map_err(|e| {
                error!("pipeline run failed: {e:#}");
                GenerationError::from(e)
            })?;

        Ok(RawOutput::Image(image))
    }

    async fn warm_up(&self) -> Result<(), GenerationError> {
        self.handle.get().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use base64::{prelude::BASE64_STANDARD, Engine};
    use image::{DynamicImage, Rgb, RgbImage};

    use super::*;
    use crate::{encode, GenerationRequest, Payload};

    struct SolidPipeline;

    impl ModelLike for SolidPipeline {
        fn run(&self, params: &GenerationParams) -> anyhow::Result<DynamicImage> {
            let width = params.width.unwrap_or(16) as u32;
            let height = params.height.unwrap_or(16) as u32;
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                width,
                height,
                Rgb([10, 20, 30]),
            )))
        }
    }

    struct SolidLoader {
        loads: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Loader for SolidLoader {
        type Model = SolidPipeline;

        async fn load(&self) -> anyhow::Result<SolidPipeline> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("no such repo");
            }
            Ok(SolidPipeline)
        }

        fn describe(&self) -> String {
            "solid".to_string()
        }
    }

    fn backend(fail: bool, policy: InitPolicy) -> (PipelineBackend<SolidLoader>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = SolidLoader {
            loads: loads.clone(),
            fail,
        };
        (PipelineBackend::new(loader, policy), loads)
    }

    #[tokio::test]
    async fn produces_png_sized_by_request() {
        let (backend, loads) = backend(false, InitPolicy::FailFast);
        let params = GenerationRequest {
            width: Some(32),
            height: Some(8),
            ..GenerationRequest::new("a lighthouse")
        }
        .validate()
        .unwrap();

        let output = backend.generate(&params).await.unwrap();
        let result = encode(params.prompt.clone(), output).unwrap();
        assert_eq!(result.format.as_deref(), Some("png"));

        let Payload::Image(encoded) = result.payload else {
            panic!("expected an image payload");
        };
        let bytes = BASE64_STANDARD.decode(encoded).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (32, 8));

        backend.generate(&params).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_unavailable_without_reloading() {
        let (backend, loads) = backend(true, InitPolicy::FailFast);
        let params = GenerationRequest::new("x").validate().unwrap();

        for _ in 0..2 {
            let err = backend.generate(&params).await.unwrap_err();
            assert!(matches!(err, GenerationError::BackendUnavailable { backend: "diffusion", .. }));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn warm_up_loads_eagerly() {
        let (backend, loads) = backend(false, InitPolicy::Retry);
        backend.warm_up().await.unwrap();
        assert!(backend.handle().is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
