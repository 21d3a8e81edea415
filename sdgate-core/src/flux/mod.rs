use std::sync::Mutex;

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::{
    clip::text_model::{Activation, ClipTextConfig, ClipTextTransformer},
    flux::{
        autoencoder::{self, AutoEncoder},
        model::{self, Flux},
        sampling,
    },
    t5::{self, T5EncoderModel},
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    lock_unpoisoned, select_best_device, tensor_to_image, DeviceMap, GenerationRequest, Loader,
    ModelLike,
};

const DEFAULT_WIDTH: usize = 1360;
const DEFAULT_HEIGHT: usize = 768;
const T5_MAX_TOKENS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FluxVariant {
    Schnell,
    Dev,
}

serde_plain::derive_display_from_serialize!(FluxVariant);
serde_plain::derive_fromstr_from_deserialize!(FluxVariant);

impl FluxVariant {
    fn repo(&self) -> &'static str {
        match self {
            FluxVariant::Schnell => "black-forest-labs/FLUX.1-schnell",
            FluxVariant::Dev => "black-forest-labs/FLUX.1-dev",
        }
    }

    fn weights_file(&self) -> &'static str {
        match self {
            FluxVariant::Schnell => "flux1-schnell.safetensors",
            FluxVariant::Dev => "flux1-dev.safetensors",
        }
    }

    fn model_config(&self) -> model::Config {
        match self {
            FluxVariant::Schnell => model::Config::schnell(),
            FluxVariant::Dev => model::Config::dev(),
        }
    }

    fn autoencoder_config(&self) -> autoencoder::Config {
        match self {
            FluxVariant::Schnell => autoencoder::Config::schnell(),
            FluxVariant::Dev => autoencoder::Config::dev(),
        }
    }
}

/// FLUX text-to-image pipeline: T5 + CLIP text encoders, the flow transformer
/// and the VAE decoder, all resident on one device.
pub struct FluxModel {
    variant: FluxVariant,
    device: Device,
    dtype: DType,
    t5_model: Mutex<T5EncoderModel>,
    t5_tokenizer: Tokenizer,
    clip_model: ClipTextTransformer,
    clip_tokenizer: Tokenizer,
    autoencoder: AutoEncoder,
    flux_model: Flux,
    // The transformer and VAE are immutable, but one denoising run at a time
    // keeps peak device memory bounded.
    run_lock: Mutex<()>,
}

impl FluxModel {
    fn t5_embedding(&self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self
            .t5_tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        tokens.resize(T5_MAX_TOKENS, 0);
        let input_ids = Tensor::new(&*tokens, &self.device)?.unsqueeze(0)?;
        // The encoder keeps no state between forward calls.
        let mut t5 = lock_unpoisoned(&self.t5_model);
        Ok(t5.forward(&input_ids)?)
    }

    fn clip_embedding(&self, prompt: &str) -> Result<Tensor> {
        let tokens = self
            .clip_tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let input_ids = Tensor::new(&*tokens, &self.device)?.unsqueeze(0)?;
        Ok(self.clip_model.forward(&input_ids)?)
    }
}

impl ModelLike for FluxModel {
    fn run(&self, request: &GenerationRequest) -> Result<DynamicImage> {
        let _guard = lock_unpoisoned(&self.run_lock);

        let width = request.width.unwrap_or(DEFAULT_WIDTH);
        let height = request.height.unwrap_or(DEFAULT_HEIGHT);

        if let Some(seed) = request.seed {
            self.device.set_seed(seed)?;
        }

        let noise_img = sampling::get_noise(1, height, width, &self.device)?.to_dtype(self.dtype)?;
        let t5_emb = self.t5_embedding(&request.prompt)?;
        let clip_emb = self.clip_embedding(&request.prompt)?;

        let state = sampling::State::new(&t5_emb, &clip_emb, &noise_img)?;
        let timesteps = match self.variant {
            FluxVariant::Schnell => sampling::get_schedule(request.steps, None),
            FluxVariant::Dev => {
                sampling::get_schedule(request.steps, Some((state.img.dim(1)?, 0.5, 1.15)))
            }
        };

        let latent_img = sampling::denoise(
            &self.flux_model,
            &state.img,
            &state.img_ids,
            &state.txt,
            &state.txt_ids,
            &state.vec,
            &timesteps,
            request.guidance,
        )?;
        let unpacked = sampling::unpack(&latent_img, height, width)?;
        debug!("generated latent image");

        let decoded = self.autoencoder.decode(&unpacked)?;
        debug!("decoded image");

        // [-1, 1] -> [0, 255]
        let img = ((decoded.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }
}

pub struct FluxLoader;

impl Loader for FluxLoader {
    type Model = FluxModel;
    type Variant = FluxVariant;

    async fn load(variant: FluxVariant, api: Api, device_map: DeviceMap) -> Result<Self::Model> {
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = device.bf16_default_to_f32();
        info!(%variant, ?device, ?dtype, "loading FLUX pipeline");

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
        debug!("T5 encoder ready");

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
        debug!("CLIP encoder ready");

        let bf_repo = api.repo(hf_hub::Repo::model(variant.repo().to_string()));
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
        let autoencoder = AutoEncoder::new(&variant.autoencoder_config(), autoencoder_vb)
            .context("failed to load autoencoder")?;

        let flux_model_file = bf_repo
            .get(variant.weights_file())
            .await
            .context("failed to get flux model file")?;
        let flux_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[flux_model_file], dtype, &device)
                .context("failed to build flux var builder")?
        };
        let flux_model =
            Flux::new(&variant.model_config(), flux_vb).context("failed to load flux model")?;
        info!(%variant, "FLUX pipeline loaded");

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
            run_lock: Mutex::new(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_round_trips_through_plain_strings() {
        assert_eq!(FluxVariant::Schnell.to_string(), "schnell");
        assert_eq!("dev".parse::<FluxVariant>().unwrap(), FluxVariant::Dev);
        assert!("turbo".parse::<FluxVariant>().is_err());
    }

    #[test]
    fn variants_point_at_their_own_weights() {
        assert_eq!(FluxVariant::Schnell.repo(), "black-forest-labs/FLUX.1-schnell");
        assert_eq!(FluxVariant::Dev.weights_file(), "flux1-dev.safetensors");
    }
}
