use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::{DeviceMap, StableDiffusionVersion};

pub const DEFAULT_MODEL: &str = "UmitDataTeam/fine-diffusion";
pub const DEFAULT_REVISION: &str = "main";
pub const DEFAULT_TOKENIZER: &str = "openai/clip-vit-base-patch32";
pub const DEFAULT_ATTENTION_SLICE: usize = 4;

/// Runner settings. The command line carries only the request itself, so
/// everything else comes from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub model_id: String,
    pub revision: String,
    pub tokenizer_repo: String,
    pub version: Option<StableDiffusionVersion>,
    pub device_map: DeviceMap,
    /// `None` disables sliced attention.
    pub attention_slice: Option<usize>,
    pub cache_dir: Option<PathBuf>,
    pub hf_token: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            tokenizer_repo: DEFAULT_TOKENIZER.to_string(),
            version: None,
            device_map: DeviceMap::ForceCpu,
            attention_slice: Some(DEFAULT_ATTENTION_SLICE),
            cache_dir: None,
            hf_token: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, which maps a variable name to its
    /// value. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(model_id) = get("SDRUN_MODEL") {
            config.model_id = model_id;
        }
        if let Some(revision) = get("SDRUN_REVISION") {
            config.revision = revision;
        }
        if let Some(tokenizer_repo) = get("SDRUN_TOKENIZER") {
            config.tokenizer_repo = tokenizer_repo;
        }
        if let Some(version) = get("SDRUN_SD_VERSION") {
            config.version = Some(
                serde_plain::from_str(version.trim())
                    .with_context(|| format!("invalid SDRUN_SD_VERSION `{version}`"))?,
            );
        }
        if let Some(device) = get("SDRUN_DEVICE") {
            config.device_map = device.parse().context("invalid SDRUN_DEVICE")?;
        }
        if let Some(slice) = get("SDRUN_ATTENTION_SLICE") {
            config.attention_slice = parse_attention_slice(&slice)
                .with_context(|| format!("invalid SDRUN_ATTENTION_SLICE `{slice}`"))?;
        }
        config.cache_dir = get("SDRUN_CACHE_DIR").map(PathBuf::from);
        config.hf_token = get("HF_TOKEN");

        Ok(config)
    }
}

fn parse_attention_slice(value: &str) -> Result<Option<usize>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    match serde_plain::from_str::<usize>(value)? {
        0 => Ok(None),
        size => Ok(Some(size)),
    }
}
