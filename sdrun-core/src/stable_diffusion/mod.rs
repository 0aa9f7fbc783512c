use std::path::PathBuf;

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, schedulers::Scheduler, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL, StableDiffusionConfig,
};
use hf_hub::api::tokio::{Api, ApiBuilder};
use hf_hub::{Repo, RepoType};
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info};

mod prompt;
mod sampling;

use crate::{
    decoded_to_image, resolve_variant, select_best_device, GenerationRequest, Loader, ModelLike,
    ModelVariant, RunnerConfig, StepProgress, UnetConfig, IMAGE_SIZE,
};

pub struct StableDiffusionModel {
    device: Device,
    dtype: DType,
    sd_config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    text_model: ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
}

impl StableDiffusionModel {
    fn text_embeddings(&self, prompt: &str) -> Result<Tensor> {
        let max_len = self.sd_config.clip.max_position_embeddings;
        let tokens = prompt::encode(&self.tokenizer, prompt, max_len, self.pad_id)?;
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }
}

impl ModelLike for StableDiffusionModel {
    fn run(
        &self,
        request: &GenerationRequest,
        on_step: &mut dyn FnMut(StepProgress) -> Result<()>,
    ) -> Result<DynamicImage> {
        if request.steps == 0 {
            anyhow::bail!("number of inference steps must be positive");
        }
        let guided = sampling::uses_guidance(request.guidance_scale);

        // --- Encode prompt (and negative prompt when guiding) ---
        let text_embeddings = self.text_embeddings(&request.prompt)?;
        let text_embeddings = if guided {
            let uncond_embeddings = self.text_embeddings(&request.negative_prompt)?;
            Tensor::cat(&[uncond_embeddings, text_embeddings], 0)?
        } else {
            text_embeddings
        };
        let text_embeddings = text_embeddings.to_dtype(self.dtype)?;

        // --- Scheduler and starting noise ---
        let mut scheduler = self.sd_config.build_scheduler(request.steps)?;
        let timesteps = scheduler.timesteps().to_vec();
        let total_steps = timesteps.len();
        let mut latents = sampling::initial_latents(
            request.height,
            request.width,
            scheduler.init_noise_sigma(),
            self.dtype,
            &self.device,
        )?;

        // --- Denoising loop ---
        for (step, &timestep) in timesteps.iter().enumerate() {
            let latent_model_input = if guided {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if guided {
                sampling::apply_guidance(&noise_pred, request.guidance_scale)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            debug!("Finished step {}/{total_steps} (timestep {timestep})", step + 1);
            on_step(StepProgress { step, total_steps })?;
        }

        // --- Decode latents ---
        let decoded = self.vae.decode(&(&latents / sampling::VAE_SCALE)?)?;
        decoded_to_image(&decoded.i(0)?)
    }
}

/// Weight and tokenizer files resolved from the hub cache.
#[derive(Debug, Clone)]
pub struct StableDiffusionWeights {
    pub variant: ModelVariant,
    pub unet: PathBuf,
    pub vae: PathBuf,
    pub clip: PathBuf,
    pub tokenizer: PathBuf,
}

pub struct StableDiffusionLoader {
    api: Api,
    config: RunnerConfig,
}

impl StableDiffusionLoader {
    pub fn new(config: RunnerConfig) -> Result<Self> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(cache_dir) = &config.cache_dir {
            builder = builder.with_cache_dir(cache_dir.clone());
        }
        if let Some(token) = &config.hf_token {
            builder = builder.with_token(Some(token.clone()));
        }
        let api = builder.build().context("failed to create hf hub API")?;
        Ok(Self { api, config })
    }
}

impl Loader for StableDiffusionLoader {
    type Weights = StableDiffusionWeights;
    type Model = StableDiffusionModel;

    async fn fetch(&self) -> Result<StableDiffusionWeights> {
        let config = &self.config;
        info!(
            "Resolving model {} (revision {})",
            config.model_id, config.revision
        );
        let repo = self.api.repo(Repo::with_revision(
            config.model_id.clone(),
            RepoType::Model,
            config.revision.clone(),
        ));

        let unet_config_file = repo
            .get("unet/config.json")
            .await
            .context("failed to get UNet config")?;
        let unet_config_str =
            std::fs::read_to_string(&unet_config_file).context("failed to read UNet config")?;
        let unet_config: UnetConfig =
            serde_json::from_str(&unet_config_str).context("failed to parse UNet config")?;
        let variant = resolve_variant(&config.model_id, config.version, Some(&unet_config))?;
        info!("Detected variant: {variant:?}");

        let unet = repo
            .get("unet/diffusion_pytorch_model.safetensors")
            .await
            .context("failed to get UNet weights")?;
        let vae = repo
            .get("vae/diffusion_pytorch_model.safetensors")
            .await
            .context("failed to get VAE weights")?;
        let clip = repo
            .get("text_encoder/model.safetensors")
            .await
            .context("failed to get CLIP text encoder weights")?;
        let tokenizer = self
            .api
            .model(config.tokenizer_repo.clone())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        debug!(
            "Weights: unet={}, vae={}, clip={}, tokenizer={}",
            unet.display(),
            vae.display(),
            clip.display(),
            tokenizer.display()
        );

        Ok(StableDiffusionWeights {
            variant,
            unet,
            vae,
            clip,
            tokenizer,
        })
    }

    fn build(&self, weights: StableDiffusionWeights) -> Result<StableDiffusionModel> {
        // Configure device.
        let device = select_best_device(self.config.device_map).context("failed to set up device")?;
        let dtype = DType::F32;
        let sd_config = weights.variant.version().config(
            self.config.attention_slice,
            IMAGE_SIZE,
            IMAGE_SIZE,
        );
        info!(
            "Building pipeline on {device:?} in {dtype:?}, attention slice {:?}",
            self.config.attention_slice
        );

        // --- Load tokenizer and CLIP text encoder ---
        let tokenizer = Tokenizer::from_file(&weights.tokenizer)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_id = prompt::pad_token_id(&tokenizer, sd_config.clip.pad_with.as_deref())?;
        let text_model =
            stable_diffusion::build_clip_transformer(&sd_config.clip, &weights.clip, &device, dtype)
                .context("failed to load CLIP text encoder")?;

        // --- Load VAE and UNet ---
        let vae = sd_config
            .build_vae(&weights.vae, &device, dtype)
            .context("failed to load VAE")?;
        let unet = sd_config
            .build_unet(
                &weights.unet,
                &device,
                sampling::LATENT_CHANNELS,
                cfg!(feature = "flash-attn"),
                dtype,
            )
            .context("failed to load UNet")?;

        Ok(StableDiffusionModel {
            device,
            dtype,
            sd_config,
            tokenizer,
            pad_id,
            text_model,
            vae,
            unet,
        })
    }
}
