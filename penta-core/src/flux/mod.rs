use std::sync::Mutex;

use anyhow::{anyhow, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::{
    clip::text_model::{Activation, ClipTextConfig, ClipTextTransformer},
    flux::{self, autoencoder::AutoEncoder, model::Flux, sampling},
    t5::{self, T5EncoderModel},
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::{select_best_device, tensor_to_image, DeviceMap, GenerationParams, Loader, ModelLike};

pub const DEFAULT_FLUX_MODEL: &str = "black-forest-labs/FLUX.1-schnell";

const DEFAULT_WIDTH: usize = 1360;
const DEFAULT_HEIGHT: usize = 768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxVariant {
    Schnell,
    Dev,
}

impl FluxVariant {
    /// Detects the variant from a hub id, defaulting to schnell.
    pub fn from_name(model_name: &str) -> Self {
        if model_name.to_uppercase().contains("DEV") {
            Self::Dev
        } else {
            Self::Schnell
        }
    }

    fn weights_file(&self) -> &'static str {
        match self {
            Self::Schnell => "flux1-schnell.safetensors",
            Self::Dev => "flux1-dev.safetensors",
        }
    }
}

pub struct FluxModel {
    variant: FluxVariant,
    device: Device,
    dtype: DType,
    // T5's forward pass takes `&mut self`.
    t5_model: Mutex<T5EncoderModel>,
    t5_tokenizer: Tokenizer,
    clip_model: ClipTextTransformer,
    clip_tokenizer: Tokenizer,
    autoencoder: AutoEncoder,
    flux_model: Flux,
}

impl ModelLike for FluxModel {
    fn run(&self, params: &GenerationParams) -> Result<DynamicImage> {
        let width = params.width.unwrap_or(DEFAULT_WIDTH);
        let height = params.height.unwrap_or(DEFAULT_HEIGHT);

        if let Some(seed) = params.seed {
            self.device.set_seed(seed)?;
        }

        let noise_img = sampling::get_noise(1, height, width, &self.device)?.to_dtype(self.dtype)?;

        let mut t5_tokens = self
            .t5_tokenizer
            .encode(params.prompt.as_str(), true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        t5_tokens.resize(256, 0);
        let input_token_ids = Tensor::new(&*t5_tokens, &self.device)?.unsqueeze(0)?;
        let t5_emb = self
            .t5_model
            .lock()
            .map_err(|_| anyhow!("T5 encoder lock poisoned"))?
            .forward(&input_token_ids)?;

        let clip_tokens = self
            .clip_tokenizer
            .encode(params.prompt.as_str(), true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let input_token_ids_clip = Tensor::new(&*clip_tokens, &self.device)?.unsqueeze(0)?;
        let clip_emb = self.clip_model.forward(&input_token_ids_clip)?;

        let state = sampling::State::new(&t5_emb, &clip_emb, &noise_img)?;
        let timesteps = match self.variant {
            FluxVariant::Schnell => sampling::get_schedule(params.num_inference_steps, None),
            FluxVariant::Dev => sampling::get_schedule(
                params.num_inference_steps,
                Some((state.img.dim(1)?, 0.5, 1.15)),
            ),
        };

        let latent_img = sampling::denoise(
            &self.flux_model,
            &state.img,
            &state.img_ids,
            &state.txt,
            &state.txt_ids,
            &state.vec,
            &timesteps,
            params.guidance_scale,
        )?;
        let unpacked = sampling::unpack(&latent_img, height, width)?;
        debug!(width, height, "generated latent image");

        let decoded = self.autoencoder.decode(&unpacked)?;
        debug!("decoded image");

        let img = ((decoded.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }
}

/// Downloads FLUX and its text encoders from the hub and builds a [`FluxModel`].
pub struct FluxLoader {
    model_id: String,
    device_map: DeviceMap,
}

impl FluxLoader {
    pub fn new(model_id: impl Into<String>, device_map: DeviceMap) -> Self {
        Self {
            model_id: model_id.into(),
            device_map,
        }
    }
}

impl Loader for FluxLoader {
    type Model = FluxModel;

    async fn load(&self) -> Result<Self::Model> {
        let variant = FluxVariant::from_name(&self.model_id);
        let api = Api::new().context("failed to create hf hub API")?;

        let device = select_best_device(self.device_map).context("failed to set up device")?;
        let dtype = device.bf16_default_to_f32();

        // --- T5 encoder and tokenizer ---
        let t5_repo = api.repo(hf_hub::Repo::with_revision(
            "google/t5-v1_1-xxl".to_string(),
            hf_hub::RepoType::Model,
            "refs/pr/2".to_string(),
        ));
        let t5_model_file = t5_repo
            .get("model.safetensors")
            .await
            .context("failed to load T5 model file")?;
        let t5_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[t5_model_file], dtype, &device)
                .context("failed to build T5 var builder")?
        };
        let config_filename = t5_repo
            .get("config.json")
            .await
            .context("failed to get T5 config")?;
        let config_str =
            std::fs::read_to_string(&config_filename).context("failed to read T5 config")?;
        let t5_config: t5::Config =
            serde_json::from_str(&config_str).context("failed to parse T5 config")?;
        let t5_model =
            T5EncoderModel::load(t5_vb, &t5_config).context("failed to load T5 model")?;
        let t5_tokenizer_filename = api
            .model("lmz/mt5-tokenizers".to_string())
            .get("t5-v1_1-xxl.tokenizer.json")
            .await
            .context("failed to get T5 tokenizer")?;
        let t5_tokenizer = Tokenizer::from_file(t5_tokenizer_filename)
            .map_err(Error::msg)
            .context("failed to load T5 tokenizer")?;

        // --- CLIP encoder and tokenizer ---
        let clip_repo = api.repo(hf_hub::Repo::model(
            "openai/clip-vit-large-patch14".to_string(),
        ));
        let clip_model_file = clip_repo
            .get("model.safetensors")
            .await
            .context("failed to get CLIP model file")?;
        let clip_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[clip_model_file], dtype, &device)
                .context("failed to build CLIP var builder")?
        };
        let clip_config = ClipTextConfig {
            vocab_size: 49408,
            projection_dim: 768,
            activation: Activation::QuickGelu,
            intermediate_size: 3072,
            embed_dim: 768,
            max_position_embeddings: 77,
            pad_with: None,
            num_hidden_layers: 12,
            num_attention_heads: 12,
        };
        let clip_model = ClipTextTransformer::new(clip_vb.pp("text_model"), &clip_config)
            .context("failed to load CLIP model")?;
        let clip_tokenizer_filename = clip_repo
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        let clip_tokenizer = Tokenizer::from_file(clip_tokenizer_filename)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;

        // --- Autoencoder and transformer ---
        let bf_repo = api.repo(hf_hub::Repo::model(self.model_id.clone()));
        let autoencoder_model_file = bf_repo
            .get("ae.safetensors")
            .await
            .context("failed to get autoencoder model file")?;
        let autoencoder_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(
                &[autoencoder_model_file],
                dtype,
                &device,
            )
            .context("failed to build autoencoder var builder")?
        };
        let autoencoder_config = match variant {
            FluxVariant::Schnell => flux::autoencoder::Config::schnell(),
            FluxVariant::Dev => flux::autoencoder::Config::dev(),
        };
        let autoencoder = AutoEncoder::new(&autoencoder_config, autoencoder_vb)
            .context("failed to load autoencoder")?;

        let flux_model_file = bf_repo
            .get(variant.weights_file())
            .await
            .context("failed to get flux model file")?;
        let flux_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[flux_model_file], dtype, &device)
                .context("failed to build flux var builder")?
        };
        let flux_config = match variant {
            FluxVariant::Schnell => flux::model::Config::schnell(),
            FluxVariant::Dev => flux::model::Config::dev(),
        };
        let flux_model = Flux::new(&flux_config, flux_vb).context("failed to load flux model")?;

        Ok(FluxModel {
            variant,
            device,
            dtype,
            t5_model: Mutex::new(t5_model),
            t5_tokenizer,
            clip_model,
            clip_tokenizer,
            autoencoder,
            flux_model,
        })
    }

    fn describe(&self) -> String {
        format!("{} on {:?}", self.model_id, self.device_map)
    }
}
