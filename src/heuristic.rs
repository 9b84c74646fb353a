//! Heuristic background replacement
//!
//! Cheap fallback for when AI matting is unavailable: estimate the backdrop
//! color from the four corners and the center, then repaint every pixel close
//! to it. Works on roughly uniform walls; anything busier needs the AI engine.

use crate::types::{RasterImage, Rgb};
use image::{DynamicImage, RgbaImage};

/// Per-channel distance (inclusive) under which a pixel counts as background
pub const BACKGROUND_TOLERANCE: u8 = 48;

/// Corner/center color-sampling background replacement
#[derive(Debug, Clone, Copy)]
pub struct HeuristicMatting {
    tolerance: u8,
}

impl Default for HeuristicMatting {
    fn default() -> Self {
        Self {
            tolerance: BACKGROUND_TOLERANCE,
        }
    }
}

impl HeuristicMatting {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different classification tolerance
    #[must_use]
    pub fn with_tolerance(tolerance: u8) -> Self {
        Self { tolerance }
    }

    /// Repaint background pixels pure white; the result is fully opaque
    #[must_use]
    pub fn replace_background(&self, image: &RasterImage) -> RasterImage {
        self.replace_background_with(image, Rgb::WHITE)
    }

    /// Repaint background pixels with `fill`; subject colors are kept and all alpha forced to 255
    #[must_use]
    pub fn replace_background_with(&self, image: &RasterImage, fill: Rgb) -> RasterImage {
        let mut pixels = image.image().to_rgba8();
        if pixels.width() == 0 || pixels.height() == 0 {
            return RasterImage::new(DynamicImage::ImageRgba8(pixels));
        }

        let reference = Self::estimate_background(&pixels);
        let [fill_r, fill_g, fill_b] = fill.channels();
        let mut replaced = 0usize;

        for px in pixels.pixels_mut() {
            if self.is_background(px.0, reference) {
                px.0 = [fill_r, fill_g, fill_b, u8::MAX];
                replaced += 1;
            } else {
                px[3] = u8::MAX;
            }
        }

        tracing::debug!(
            reference = ?reference.channels(),
            replaced,
            total = pixels.len() / 4,
            "Heuristic background replacement"
        );
        RasterImage::new(DynamicImage::ImageRgba8(pixels))
    }

    /// Rounded mean of the four corners and the center pixel
    #[must_use]
    pub fn estimate_background(pixels: &RgbaImage) -> Rgb {
        let (w, h) = pixels.dimensions();
        let samples = [
            (0, 0),
            (w - 1, 0),
            (0, h - 1),
            (w - 1, h - 1),
            (w / 2, h / 2),
        ];

        let mut sums = [0u32; 3];
        for (x, y) in samples {
            let px = pixels.get_pixel(x, y);
            for (sum, &value) in sums.iter_mut().zip(px.0.iter()) {
                *sum += u32::from(value);
            }
        }
        let count = samples.len() as f64;
        let mean = |sum: u32| (f64::from(sum) / count).round() as u8;
        Rgb::new(mean(sums[0]), mean(sums[1]), mean(sums[2]))
    }

    fn is_background(&self, px: [u8; 4], reference: Rgb) -> bool {
        px.iter()
            .zip(reference.channels())
            .all(|(&value, target)| value.abs_diff(target) <= self.tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const GRAY: Rgba<u8> = Rgba([128, 128, 128, 255]);
    const SUBJECT: Rgba<u8> = Rgba([200, 30, 40, 255]);

    fn two_tone() -> RasterImage {
        // Subject block that avoids the center sample
        let img = RgbaImage::from_fn(20, 20, |x, y| {
            if (2..8).contains(&x) && (2..8).contains(&y) {
                SUBJECT
            } else {
                GRAY
            }
        });
        RasterImage::new(DynamicImage::ImageRgba8(img))
    }

    #[test]
    fn test_two_tone_background_becomes_white() {
        let out = HeuristicMatting::new().replace_background(&two_tone());
        let rgba = out.image().to_rgba8();

        for (x, y, px) in rgba.enumerate_pixels() {
            if (2..8).contains(&x) && (2..8).contains(&y) {
                assert_eq!(*px, SUBJECT, "subject pixel changed at {x},{y}");
            } else {
                assert_eq!(px.0, [255, 255, 255, 255], "background pixel kept at {x},{y}");
            }
        }
        assert!(out.is_opaque());
    }

    #[test]
    fn test_subject_alpha_forced_opaque() {
        let mut img = RgbaImage::from_pixel(5, 5, GRAY);
        img.put_pixel(1, 1, Rgba([0, 0, 255, 10]));
        let out = HeuristicMatting::new()
            .replace_background(&RasterImage::new(DynamicImage::ImageRgba8(img)));
        assert_eq!(out.image().to_rgba8().get_pixel(1, 1).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_estimate_uses_rounded_mean() {
        let mut img = RgbaImage::from_pixel(3, 3, Rgba([10, 10, 10, 255]));
        img.put_pixel(1, 1, Rgba([13, 10, 10, 255]));
        // (10*4 + 13) / 5 = 10.6 -> 11
        assert_eq!(HeuristicMatting::estimate_background(&img), Rgb::new(11, 10, 10));
    }

    #[test]
    fn test_tolerance_boundary() {
        let mut img = RgbaImage::from_pixel(9, 9, Rgba([100, 100, 100, 255]));
        img.put_pixel(3, 3, Rgba([148, 100, 100, 255]));
        img.put_pixel(5, 3, Rgba([149, 100, 100, 255]));
        let out = HeuristicMatting::new()
            .replace_background(&RasterImage::new(DynamicImage::ImageRgba8(img)))
            .into_image()
            .to_rgba8();
        assert_eq!(out.get_pixel(3, 3).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(5, 3).0, [149, 100, 100, 255]);
    }

    #[test]
    fn test_custom_fill_and_single_pixel() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([7, 7, 7, 0]));
        let out = HeuristicMatting::new().replace_background_with(
            &RasterImage::new(DynamicImage::ImageRgba8(img)),
            Rgb::new(0, 0, 255),
        );
        assert_eq!(out.image().to_rgba8().get_pixel(0, 0).0, [0, 0, 255, 255]);
    }
}
