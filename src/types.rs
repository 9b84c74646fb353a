//! Core types passed between pipeline stages

use crate::error::{IdPhotoError, Result};
use image::{DynamicImage, GenericImageView, GrayImage};
use serde::{Deserialize, Serialize};

/// Solid RGB color used for backgrounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Pure white, the default ID photo background
    pub const WHITE: Self = Self::new(255, 255, 255);

    /// Create a new color
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channel array for pixel writes
    #[must_use]
    pub const fn channels(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Decoded raster plus the metadata the codec reports for it
///
/// Stages never mutate a `RasterImage` they were handed; each returns a new one.
#[derive(Debug, Clone)]
pub struct RasterImage {
    image: DynamicImage,
}

impl RasterImage {
    /// Wrap a decoded image
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Borrow the underlying image
    #[must_use]
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Unwrap into the underlying image
    #[must_use]
    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Width and height
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Number of color channels including alpha
    #[must_use]
    pub fn channel_count(&self) -> u8 {
        self.image.color().channel_count()
    }

    /// Whether the pixel layout carries an alpha channel
    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.image.color().has_alpha()
    }

    /// True when every pixel is fully opaque (also true for layouts without alpha)
    #[must_use]
    pub fn is_opaque(&self) -> bool {
        if !self.has_alpha() {
            return true;
        }
        self.image.to_rgba8().pixels().all(|p| p[3] == u8::MAX)
    }
}

impl From<DynamicImage> for RasterImage {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Single-channel matte with the same dimensions as the image it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Mask {
    /// Create a mask from raw row-major values
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(IdPhotoError::processing_stage_error(
                "mask",
                &format!("expected {} values, got {}", expected, data.len()),
                Some(&format!("{}x{}", width, height)),
            ));
        }
        Ok(Self { data, width, height })
    }

    /// Create a mask from a grayscale image
    #[must_use]
    pub fn from_luma(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    /// Convert the mask to a grayscale image
    pub fn to_luma(&self) -> Result<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| IdPhotoError::internal("Failed to create image from mask data"))
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw mask values
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Whether this mask can be joined back onto `image`
    #[must_use]
    pub fn matches(&self, image: &RasterImage) -> bool {
        (self.width, self.height) == image.dimensions()
    }

    /// True when every value is either 0 or 255
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.data.iter().all(|&v| v == 0 || v == u8::MAX)
    }
}

/// How a cutout was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalMode {
    /// AI matting succeeded
    Ai,
    /// Heuristic matting, AI never attempted
    Fast,
    /// Heuristic matting after an AI failure
    FastFallback,
    /// Heuristic matting after a post-cutout failure
    FastRescue,
    /// AI cutout flattened onto an explicitly requested replacement background
    AiReplace,
    /// AI failed and no fallback was allowed
    AiError,
}

impl RemovalMode {
    /// Wire name used in JSON responses
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Fast => "fast",
            Self::FastFallback => "fast_fallback",
            Self::FastRescue => "fast_rescue",
            Self::AiReplace => "ai_replace",
            Self::AiError => "ai_error",
        }
    }

    /// Whether the heuristic path produced the pixels
    #[must_use]
    pub fn is_heuristic(self) -> bool {
        matches!(self, Self::Fast | Self::FastFallback | Self::FastRescue)
    }
}

impl std::fmt::Display for RemovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the removal orchestrator
///
/// `transparent == true` implies `pixels` carries a genuine alpha channel;
/// otherwise the pixels are opaque and already flattened.
#[derive(Debug, Clone)]
pub struct CutoutResult {
    pub pixels: RasterImage,
    pub mode: RemovalMode,
    pub transparent: bool,
}

/// Cutout encoded for the wire
#[derive(Debug, Clone)]
pub struct EncodedCutout {
    pub bytes: Vec<u8>,
    pub format: crate::config::OutputFormat,
    pub mode: RemovalMode,
    pub transparent: bool,
}
