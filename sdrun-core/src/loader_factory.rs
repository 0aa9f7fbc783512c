use anyhow::{anyhow, Result};
use candle_transformers::models::stable_diffusion::StableDiffusionConfig;
use serde::Deserialize;

/// Stable Diffusion releases whose UNet/VAE/CLIP layouts are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StableDiffusionVersion {
    #[serde(rename = "v1-5", alias = "1.5", alias = "v1.5")]
    V1_5,
    #[serde(rename = "v2-1", alias = "2.1", alias = "v2.1")]
    V2_1,
}

impl StableDiffusionVersion {
    pub fn config(
        &self,
        sliced_attention_size: Option<usize>,
        height: usize,
        width: usize,
    ) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => {
                StableDiffusionConfig::v1_5(sliced_attention_size, Some(height), Some(width))
            }
            Self::V2_1 => {
                StableDiffusionConfig::v2_1(sliced_attention_size, Some(height), Some(width))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    StableDiffusion(StableDiffusionVersion),
}

/// The subset of a diffusers `unet/config.json` used to tell releases apart.
#[derive(Debug, Clone, Deserialize)]
pub struct UnetConfig {
    pub cross_attention_dim: Option<usize>,
}

impl ModelVariant {
    /// Detect model variant from model name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("2-1") || name_upper.contains("2.1") {
            Some(ModelVariant::StableDiffusion(StableDiffusionVersion::V2_1))
        } else if name_upper.contains("1-5") || name_upper.contains("1.5") {
            Some(ModelVariant::StableDiffusion(StableDiffusionVersion::V1_5))
        } else {
            None
        }
    }

    /// Detect model variant from the width of the text conditioning the UNet expects
    pub fn from_unet_config(config: &UnetConfig) -> Option<Self> {
        match config.cross_attention_dim? {
            768 => Some(ModelVariant::StableDiffusion(StableDiffusionVersion::V1_5)),
            1024 => Some(ModelVariant::StableDiffusion(StableDiffusionVersion::V2_1)),
            _ => None,
        }
    }

    pub fn version(&self) -> StableDiffusionVersion {
        match self {
            ModelVariant::StableDiffusion(version) => *version,
        }
    }
}

/// Pick the variant for a model, preferring an explicit override, then the
/// weights' own config, then the model name.
pub fn resolve_variant(
    model_name: &str,
    forced: Option<StableDiffusionVersion>,
    unet_config: Option<&UnetConfig>,
) -> Result<ModelVariant> {
    if let Some(version) = forced {
        return Ok(ModelVariant::StableDiffusion(version));
    }
    unet_config
        .and_then(ModelVariant::from_unet_config)
        .or_else(|| ModelVariant::from_name(model_name))
        .ok_or_else(|| anyhow!("Unsupported model variant: {}", model_name))
}
