use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use image::DynamicImage;
use tracing::{info, warn};

use crate::DeviceMap;

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => {
            info!("Using CUDA device {ordinal}");
            Ok(Device::new_cuda(ordinal)?)
        }
        DeviceMap::Ordinal(ordinal) if metal_is_available() => {
            info!("Using Metal device {ordinal}");
            Ok(Device::new_metal(ordinal)?)
        }
        DeviceMap::Ordinal(_) => {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            {
                warn!("Running on CPU, to run on GPU(metal), build with `--features metal`");
            }
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            {
                warn!("Running on CPU, to run on GPU, build with `--features cuda`");
            }
            Ok(Device::Cpu)
        }
    }
}

/// Converts a decoder output with shape (3, height, width) and values in
/// `[-1, 1]` into an RGB image.
pub fn decoded_to_image(decoded: &Tensor) -> Result<DynamicImage> {
    let img = ((decoded / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
    let img = (img.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?;
    tensor_to_image(&img)
}

/// Converts a `u8` tensor with shape (3, height, width) into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        anyhow::bail!("tensor_to_image expects an image with 3 channels, got {channels}");
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    let buffer = image::ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| candle_core::Error::msg("error converting tensor to image buffer"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_forced() {
        assert!(select_best_device(DeviceMap::ForceCpu).unwrap().is_cpu());
    }

    #[test]
    fn converts_channel_first_tensor() {
        // red, green and blue planes of a 2x1 image
        let data: Vec<u8> = vec![255, 0, 0, 10, 0, 20];
        let tensor = Tensor::from_vec(data, (3, 1, 2), &Device::Cpu).unwrap();
        let img = tensor_to_image(&tensor).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (2, 1));
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 10, 20]);
    }

    #[test]
    fn rejects_non_rgb_tensors() {
        let tensor = Tensor::zeros((1, 4, 4), DType::U8, &Device::Cpu).unwrap();
        assert!(tensor_to_image(&tensor).is_err());
    }

    #[test]
    fn maps_decoder_range_to_bytes() {
        let decoded = Tensor::new(&[[[-1f32, 0.0, 1.0, 3.0]], [[0f32; 4]], [[0f32; 4]]], &Device::Cpu)
            .unwrap();
        let img = decoded_to_image(&decoded).unwrap().to_rgb8();
        let reds: Vec<u8> = (0..4).map(|x| img.get_pixel(x, 0).0[0]).collect();
        assert_eq!(reds[0], 0);
        assert_eq!(reds[2], 255);
        assert_eq!(reds[3], 255);
        assert!(reds[1] == 127 || reds[1] == 128);
    }
}
