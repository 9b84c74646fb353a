//! Alpha mask refinement
//!
//! Cleans up a cutout's matte in three passes: a binary threshold, a small
//! median filter to drop speckle, then a Gaussian feather on the hard edge.
//! RGB data is never touched.

use crate::{
    error::{IdPhotoError, Result},
    services::ImageCodec,
    types::{Mask, RasterImage},
};
use serde::{Deserialize, Serialize};

/// Refinement parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineOptions {
    /// Denoise strength in `[0, 1]`; drives the median window size
    pub strength: f32,
    /// Binary threshold in `[0, 255]`
    pub threshold: f32,
    /// Gaussian feather sigma (`>= 0`)
    pub feather_sigma: f32,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            strength: 0.6,
            threshold: 180.0,
            feather_sigma: 0.8,
        }
    }
}

impl RefineOptions {
    /// Median window side: `max(1, round(3 * strength))`
    #[must_use]
    pub fn median_size(&self) -> u32 {
        let strength = if self.strength.is_finite() {
            self.strength.clamp(0.0, 1.0)
        } else {
            0.0
        };
        ((3.0 * strength).round() as u32).max(1)
    }

    /// Threshold rounded and clamped to a byte
    #[must_use]
    pub fn threshold_level(&self) -> u8 {
        if self.threshold.is_finite() {
            self.threshold.round().clamp(0.0, 255.0) as u8
        } else {
            180
        }
    }

    /// Non-negative feather sigma; non-finite values disable feathering
    #[must_use]
    pub fn sigma(&self) -> f32 {
        if self.feather_sigma.is_finite() {
            self.feather_sigma.max(0.0)
        } else {
            0.0
        }
    }
}

/// Threshold → median → blur pipeline on the alpha channel
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaMaskRefiner;

impl AlphaMaskRefiner {
    /// Refine the alpha channel; any failure returns the input unchanged
    #[must_use]
    pub fn refine(image: &RasterImage, options: &RefineOptions) -> RasterImage {
        match Self::try_refine(image, options) {
            Ok(refined) => refined,
            Err(e) => {
                tracing::warn!(error = %e, "Mask refinement failed, returning original image");
                image.clone()
            },
        }
    }

    /// Refine the alpha channel, reporting failures
    ///
    /// Images without an alpha channel are returned as-is: their implied
    /// matte is fully opaque and stays so through every pass.
    pub fn try_refine(image: &RasterImage, options: &RefineOptions) -> Result<RasterImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(IdPhotoError::geometry("cannot refine an empty image"));
        }
        if !image.has_alpha() {
            return Ok(image.clone());
        }

        let alpha = ImageCodec::extract_alpha(image);
        let refined = Self::refine_mask(&alpha, options)?;
        ImageCodec::join_alpha(image, &refined)
    }

    /// Run the three mask passes
    pub fn refine_mask(mask: &Mask, options: &RefineOptions) -> Result<Mask> {
        let binary = Self::threshold_stage(mask, options);
        let denoised = ImageCodec::median(&binary, options.median_size());
        ImageCodec::blur(&denoised, options.sigma())
    }

    /// First pass on its own; idempotent on its own output
    #[must_use]
    pub fn threshold_stage(mask: &Mask, options: &RefineOptions) -> Mask {
        ImageCodec::threshold(mask, options.threshold_level())
    }
}
