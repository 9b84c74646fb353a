//! Tensor conversion shared by the embedded inference backends
//!
//! Image → normalized NCHW tensor on the way in, saliency map → alpha mask on
//! the way out.

use crate::{
    error::{IdPhotoError, Result},
    models::PreprocessingConfig,
    services::ImageCodec,
    types::{Mask, RasterImage},
};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use ndarray::Array4;

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Stretch to the model input size and normalize into a `(1, 3, S, S)` tensor
    ///
    /// Pixels are divided by the brightest channel value before mean/std
    /// normalization, matching how U²-Net was trained.
    #[must_use]
    pub fn to_tensor(image: &DynamicImage, config: &PreprocessingConfig) -> Array4<f32> {
        let size = config.input_size;
        let resized = image::imageops::resize(&image.to_rgb8(), size, size, FilterType::Lanczos3);
        let peak = resized.as_raw().iter().copied().max().map_or(1.0, |v| f32::from(v.max(1)));

        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match the resized image
        for (y, row) in resized.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for channel in 0..3 {
                    tensor[[0, channel, y, x]] = (f32::from(pixel[channel]) / peak
                        - config.normalization_mean[channel])
                        / config.normalization_std[channel];
                }
            }
        }
        tensor
    }

    /// Min-max normalize the first output channel and scale it back to `width`×`height`
    pub fn to_mask(output: &Array4<f32>, width: u32, height: u32) -> Result<Mask> {
        let (_, channels, rows, cols) = output.dim();
        if channels == 0 || rows == 0 || cols == 0 {
            return Err(IdPhotoError::engine_failure(
                "embedded",
                &format!("unexpected output shape {:?}", output.shape()),
            ));
        }

        let plane = output.slice(ndarray::s![0, 0, .., ..]);
        let (min, max) = plane
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = if (max - min).abs() < f32::EPSILON { 1.0 } else { max - min };

        let values: Vec<u8> = plane
            .iter()
            .map(|&v| (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();
        let small = GrayImage::from_raw(cols as u32, rows as u32, values)
            .ok_or_else(|| IdPhotoError::internal("Failed to build mask from model output"))?;
        let resized = image::imageops::resize(&small, width, height, FilterType::Triangle);
        Ok(Mask::from_luma(resized))
    }

    /// Full embedded-backend round trip: decode, infer, attach alpha, encode PNG
    pub fn run_matting<F>(png: &[u8], config: &PreprocessingConfig, infer: F) -> Result<Vec<u8>>
    where
        F: FnOnce(Array4<f32>) -> Result<Array4<f32>>,
    {
        let source = ImageCodec::decode(png)?;
        let tensor = Self::to_tensor(source.image(), config);
        let output = infer(tensor)?;
        let mask = Self::to_mask(&output, source.width(), source.height())?;
        let cutout: RasterImage = ImageCodec::join_alpha(&source, &mask)?;
        ImageCodec::encode_png(cutout.image())
    }
}
