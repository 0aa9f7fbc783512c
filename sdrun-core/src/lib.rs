pub mod config;
pub mod device_map;
pub mod loader;
mod loader_factory;
pub mod progress;
pub mod runner;
mod util;

mod stable_diffusion;

pub use config::*;
pub use device_map::*;
use image::DynamicImage;
pub use loader::*;
pub use loader_factory::*;
pub use progress::*;
pub use runner::*;
pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionModel, StableDiffusionWeights};
pub(crate) use util::*;

/// Side length of every generated image.
pub const IMAGE_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: usize,
    pub guidance_scale: f64,
    pub width: usize,
    pub height: usize,
}

impl GenerationRequest {
    /// Builds a request at the fixed 512x512 resolution.
    pub fn new(
        prompt: impl Into<String>,
        negative_prompt: impl Into<String>,
        steps: usize,
        guidance_scale: f64,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: negative_prompt.into(),
            steps,
            guidance_scale,
            width: IMAGE_SIZE,
            height: IMAGE_SIZE,
        }
    }
}

/// Position of the sampler within a run, handed to the per-step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepProgress {
    /// Zero-based index of the step that just finished.
    pub step: usize,
    /// Number of timesteps the scheduler was configured with.
    pub total_steps: usize,
}

pub trait ModelLike: Send + Sync {
    /// Runs one generation, calling `on_step` after every denoising step.
    fn run(
        &self,
        request: &GenerationRequest,
        on_step: &mut dyn FnMut(StepProgress) -> anyhow::Result<()>,
    ) -> anyhow::Result<DynamicImage>;
}
