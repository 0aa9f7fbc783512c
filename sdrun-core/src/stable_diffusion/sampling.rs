use anyhow::Result;
use candle_core::{DType, Device, Tensor};

/// Latent channels of the Stable Diffusion VAE.
pub(crate) const LATENT_CHANNELS: usize = 4;
/// Scale the VAE latents were trained with.
pub(crate) const VAE_SCALE: f64 = 0.18215;

/// Classifier-free guidance only kicks in above a scale of one.
pub(crate) fn uses_guidance(guidance_scale: f64) -> bool {
    guidance_scale > 1.0
}

pub(crate) fn initial_latents(
    height: usize,
    width: usize,
    init_noise_sigma: f64,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let latents = Tensor::randn(
        0f32,
        1f32,
        (1, LATENT_CHANNELS, height / 8, width / 8),
        device,
    )?;
    Ok((latents * init_noise_sigma)?.to_dtype(dtype)?)
}

/// Combines a batched (unconditional, conditional) noise prediction.
pub(crate) fn apply_guidance(noise_pred: &Tensor, guidance_scale: f64) -> Result<Tensor> {
    let chunks = noise_pred.chunk(2, 0)?;
    let (uncond, text) = (&chunks[0], &chunks[1]);
    Ok((uncond + ((text - uncond)? * guidance_scale)?)?)
}
