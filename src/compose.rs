//! Canvas composition with policy presets and head/eye auto-adjust
//!
//! The geometry is computed up front by [`ComposeEngine::plan`], a pure
//! function of the source size, the resolved canvas and the optional
//! auto-adjust hints. Rendering then resizes, places, flattens and encodes.
//! Whatever the hints ask for, the scaled subject always fits the canvas.

use crate::{
    config::{OutputFormat, ServiceConfig},
    error::{IdPhotoError, Result},
    presets::PresetTable,
    services::ImageCodec,
    types::{RasterImage, Rgb},
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Lower bound of the head-size driven scale
const MIN_HEAD_SCALE: f64 = 0.5;
/// Upper bound of the head-size driven scale
const MAX_HEAD_SCALE: f64 = 4.0;
/// Eye line estimate, as a fraction of the head box measured from its top
const EYE_LINE_FRACTION: f64 = 0.40;

/// Round half up, matching how client-side tooling computes the same values
fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Head bounding box in target-canvas pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadBox {
    pub top: f64,
    pub bottom: f64,
}

/// Inclusive ratio range; both bounds are clamped to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PctRange {
    pub min: f64,
    pub max: f64,
}

impl PctRange {
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Midpoint of the clamped bounds
    #[must_use]
    pub fn midpoint(&self) -> f64 {
        (self.min.clamp(0.0, 1.0) + self.max.clamp(0.0, 1.0)) / 2.0
    }
}

/// Head/eye placement hints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoAdjustSpec {
    pub head_box: HeadBox,
    /// Head height as a share of the canvas height
    pub head_pct: PctRange,
    /// Eye line height above the bottom edge as a share of the canvas height
    pub eyes_from_bottom_pct: PctRange,
}

impl AutoAdjustSpec {
    /// Default head share range
    pub const DEFAULT_HEAD_PCT: PctRange = PctRange::new(0.50, 0.69);
    /// Default eyes-from-bottom share range
    pub const DEFAULT_EYES_FROM_BOTTOM_PCT: PctRange = PctRange::new(0.56, 0.69);

    /// Hints with the default ratio ranges
    #[must_use]
    pub fn new(head_box: HeadBox) -> Self {
        Self {
            head_box,
            head_pct: Self::DEFAULT_HEAD_PCT,
            eyes_from_bottom_pct: Self::DEFAULT_EYES_FROM_BOTTOM_PCT,
        }
    }

    /// Head height at target scale, at least one pixel
    #[must_use]
    pub fn head_height(&self) -> f64 {
        (self.head_box.bottom - self.head_box.top).max(1.0)
    }

    /// Scale that puts the head at the middle of its range, clamped to [0.5, 4]
    #[must_use]
    pub fn head_scale(&self, canvas_height: u32) -> f64 {
        let target_head_px = self.head_pct.midpoint() * f64::from(canvas_height);
        (target_head_px / self.head_height()).clamp(MIN_HEAD_SCALE, MAX_HEAD_SCALE)
    }

    /// Vertical shift that puts the estimated eye line at the middle of its range
    #[must_use]
    pub fn offset_y(&self, canvas_height: u32, scale: f64) -> f64 {
        let height = f64::from(canvas_height);
        let eye_y = round_half_up(self.head_box.top + EYE_LINE_FRACTION * self.head_height());
        let desired_eye_y = round_half_up(height - self.eyes_from_bottom_pct.midpoint() * height);
        round_half_up(desired_eye_y - eye_y * scale)
    }
}

/// Client-supplied composition request
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeRequest {
    pub width: u32,
    pub height: u32,
    pub background: Rgb,
    pub format: OutputFormat,
    pub template_key: Option<String>,
    pub auto_adjust: Option<AutoAdjustSpec>,
}

impl Default for ComposeRequest {
    fn default() -> Self {
        Self {
            width: 600,
            height: 600,
            background: Rgb::WHITE,
            format: OutputFormat::Jpeg,
            template_key: None,
            auto_adjust: None,
        }
    }
}

/// Canvas parameters after policy presets and caps were applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCanvas {
    pub width: u32,
    pub height: u32,
    pub background: Rgb,
    pub format: OutputFormat,
    /// Key of the preset that was applied, if any
    pub preset: Option<String>,
}

/// Computed geometry for one composition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Scale before the fit-to-canvas clamp (1.0 without auto-adjust)
    pub initial_scale: f64,
    /// Final uniform scale
    pub scale: f64,
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Requested vertical shift before clamping
    pub offset_y: f64,
    pub left: u32,
    pub top: u32,
}

/// Finished, encoded photo
#[derive(Debug, Clone)]
pub struct ComposedPhoto {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub placement: Placement,
}

/// Scales and places a cutout on a policy-conformant canvas
#[derive(Debug, Clone)]
pub struct ComposeEngine {
    presets: PresetTable,
    max_side: u32,
    jpeg_quality: u8,
}

impl ComposeEngine {
    #[must_use]
    pub fn new(presets: PresetTable, max_side: u32, jpeg_quality: u8) -> Self {
        Self {
            presets,
            max_side: max_side.max(1),
            jpeg_quality,
        }
    }

    /// Engine configured from the service configuration
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            PresetTable::new(config.presets.clone()),
            config.max_side,
            config.jpeg_quality,
        )
    }

    /// Apply preset overrides (which always win) or the side cap
    #[must_use]
    pub fn resolve(&self, request: &ComposeRequest) -> ResolvedCanvas {
        if let Some(preset) = self.presets.lookup(request.template_key.as_deref()) {
            let side = preset.resolve_side(request.width, request.height);
            return ResolvedCanvas {
                width: side,
                height: side,
                background: preset.background,
                format: preset.format,
                preset: Some(preset.key.clone()),
            };
        }

        ResolvedCanvas {
            width: request.width.clamp(1, self.max_side),
            height: request.height.clamp(1, self.max_side),
            background: request.background,
            format: request.format,
            preset: None,
        }
    }

    /// Compute scale and position of a `source_width`×`source_height` cutout
    ///
    /// # Errors
    /// - Source or canvas has a zero dimension
    pub fn plan(
        source_width: u32,
        source_height: u32,
        canvas: &ResolvedCanvas,
        auto_adjust: Option<&AutoAdjustSpec>,
    ) -> Result<Placement> {
        if source_width == 0 || source_height == 0 {
            return Err(IdPhotoError::geometry(format!(
                "cannot infer source dimensions ({}x{})",
                source_width, source_height
            )));
        }
        if canvas.width == 0 || canvas.height == 0 {
            return Err(IdPhotoError::geometry(format!(
                "canvas must be positive ({}x{})",
                canvas.width, canvas.height
            )));
        }

        let (src_w, src_h) = (f64::from(source_width), f64::from(source_height));
        let (canvas_w, canvas_h) = (f64::from(canvas.width), f64::from(canvas.height));

        let (initial_scale, offset_y) = match auto_adjust {
            Some(spec) => {
                let scale = spec.head_scale(canvas.height);
                (scale, spec.offset_y(canvas.height, scale))
            },
            None => (1.0, 0.0),
        };

        let fit = (canvas_w / src_w).min(canvas_h / src_h).min(1.0);
        let scale = initial_scale.min(fit);

        let scaled_width = (round_half_up(src_w * scale) as u32).clamp(1, canvas.width);
        let scaled_height = (round_half_up(src_h * scale) as u32).clamp(1, canvas.height);

        let left = round_half_up((canvas_w - f64::from(scaled_width)) / 2.0);
        let top = round_half_up(offset_y + (canvas_h - f64::from(scaled_height)) / 2.0);
        let left = left.clamp(0.0, f64::from(canvas.width - scaled_width)) as u32;
        let top = top.clamp(0.0, f64::from(canvas.height - scaled_height)) as u32;

        Ok(Placement {
            initial_scale,
            scale,
            scaled_width,
            scaled_height,
            offset_y,
            left,
            top,
        })
    }

    /// Compose an already-decoded cutout
    #[tracing::instrument(skip(self, cutout), fields(src = ?cutout.dimensions()))]
    pub fn compose(&self, cutout: &RasterImage, request: &ComposeRequest) -> Result<ComposedPhoto> {
        let canvas = self.resolve(request);
        let placement = Self::plan(
            cutout.width(),
            cutout.height(),
            &canvas,
            request.auto_adjust.as_ref(),
        )?;

        let scaled = cutout.image().resize_exact(
            placement.scaled_width,
            placement.scaled_height,
            image::imageops::FilterType::Lanczos3,
        );
        let composed = ImageCodec::place_on_canvas(
            canvas.width,
            canvas.height,
            &scaled.to_rgba8(),
            i64::from(placement.left),
            i64::from(placement.top),
        );
        let flat = ImageCodec::flatten(&DynamicImage::ImageRgba8(composed), canvas.background);
        let bytes = ImageCodec::encode(&DynamicImage::ImageRgb8(flat), canvas.format, self.jpeg_quality)?;

        tracing::debug!(
            width = canvas.width,
            height = canvas.height,
            format = %canvas.format,
            preset = canvas.preset.as_deref().unwrap_or("none"),
            scale = placement.scale,
            left = placement.left,
            top = placement.top,
            "Composed photo"
        );

        Ok(ComposedPhoto {
            bytes,
            width: canvas.width,
            height: canvas.height,
            format: canvas.format,
            placement,
        })
    }

    /// Decode then compose
    pub fn compose_bytes(&self, input: &[u8], request: &ComposeRequest) -> Result<ComposedPhoto> {
        let cutout = ImageCodec::decode(input)?;
        self.compose(&cutout, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{PolicyPreset, DV_LOTTERY_KEY};

    fn engine() -> ComposeEngine {
        ComposeEngine::new(PresetTable::new(vec![PolicyPreset::dv_lottery()]), 3000, 92)
    }

    fn canvas(width: u32, height: u32) -> ResolvedCanvas {
        ResolvedCanvas {
            width,
            height,
            background: Rgb::WHITE,
            format: OutputFormat::Jpeg,
            preset: None,
        }
    }

    #[test]
    fn test_head_scale_scenario() {
        let spec = AutoAdjustSpec::new(HeadBox { top: 120.0, bottom: 320.0 });
        assert_eq!(spec.head_height(), 200.0);
        assert!((spec.head_pct.midpoint() - 0.595).abs() < 1e-12);
        assert!((spec.head_scale(600) - 1.785).abs() < 1e-9);

        // A 600x600 source can't grow, so the fit clamp wins
        let placement = ComposeEngine::plan(600, 600, &canvas(600, 600), Some(&spec)).unwrap();
        assert!((placement.initial_scale - 1.785).abs() < 1e-9);
        assert_eq!(placement.scale, 1.0);
        assert_eq!((placement.left, placement.top), (0, 0));
    }

    #[test]
    fn test_head_scale_clamped() {
        let tiny = AutoAdjustSpec::new(HeadBox { top: 10.0, bottom: 12.0 });
        assert_eq!(tiny.head_scale(600), 4.0);
        let huge = AutoAdjustSpec::new(HeadBox { top: 0.0, bottom: 5000.0 });
        assert_eq!(huge.head_scale(600), 0.5);
        // Inverted boxes count as one pixel tall
        let inverted = AutoAdjustSpec::new(HeadBox { top: 50.0, bottom: 10.0 });
        assert_eq!(inverted.head_height(), 1.0);
    }

    #[test]
    fn test_offset_rounding() {
        let spec = AutoAdjustSpec::new(HeadBox { top: 120.0, bottom: 320.0 });
        // eye = round(120 + 80) = 200; desired = round(600 - 0.625 * 600) = 225
        assert_eq!(spec.offset_y(600, 1.0), 25.0);
        assert_eq!(spec.offset_y(600, 0.5), 125.0);
    }

    #[test]
    fn test_plan_without_auto_adjust_centers() {
        let placement = ComposeEngine::plan(300, 200, &canvas(600, 600), None).unwrap();
        assert_eq!(placement.scale, 1.0);
        assert_eq!((placement.scaled_width, placement.scaled_height), (300, 200));
        assert_eq!((placement.left, placement.top), (150, 200));

        let placement = ComposeEngine::plan(1200, 600, &canvas(600, 600), None).unwrap();
        assert_eq!(placement.scale, 0.5);
        assert_eq!((placement.scaled_width, placement.scaled_height), (600, 300));
        assert_eq!((placement.left, placement.top), (0, 150));
    }

    #[test]
    fn test_plan_clamps_offset_into_canvas() {
        let spec = AutoAdjustSpec {
            eyes_from_bottom_pct: PctRange::new(0.0, 0.0),
            ..AutoAdjustSpec::new(HeadBox { top: 0.0, bottom: 10.0 })
        };
        let placement = ComposeEngine::plan(100, 100, &canvas(600, 600), Some(&spec)).unwrap();
        assert!(placement.offset_y > 500.0);
        assert_eq!(placement.top, 500);
        assert!(placement.top + placement.scaled_height <= 600);
    }

    #[test]
    fn test_plan_rejects_empty_source() {
        let err = ComposeEngine::plan(0, 10, &canvas(600, 600), None).unwrap_err();
        assert!(matches!(err, IdPhotoError::Geometry(_)));
    }

    #[test]
    fn test_resolve_preset_overrides_client_values() {
        let request = ComposeRequest {
            width: 2000,
            height: 400,
            background: Rgb::new(0, 0, 255),
            format: OutputFormat::Png,
            template_key: Some(DV_LOTTERY_KEY.to_uppercase()),
            auto_adjust: None,
        };
        let resolved = engine().resolve(&request);
        assert_eq!((resolved.width, resolved.height), (1200, 1200));
        assert_eq!(resolved.background, Rgb::WHITE);
        assert_eq!(resolved.format, OutputFormat::Jpeg);
        assert_eq!(resolved.preset.as_deref(), Some(DV_LOTTERY_KEY));
    }

    #[test]
    fn test_resolve_caps_non_preset_sides() {
        let request = ComposeRequest {
            width: 9000,
            height: 800,
            format: OutputFormat::Png,
            ..ComposeRequest::default()
        };
        let resolved = engine().resolve(&request);
        assert_eq!((resolved.width, resolved.height), (3000, 800));
        assert_eq!(resolved.format, OutputFormat::Png);
        assert!(resolved.preset.is_none());
    }

    #[test]
    fn test_compose_output_is_exact_and_opaque() {
        let cutout = RasterImage::new(DynamicImage::new_rgba8(300, 500));
        let request = ComposeRequest {
            width: 413,
            height: 531,
            format: OutputFormat::Png,
            ..ComposeRequest::default()
        };
        let photo = engine().compose(&cutout, &request).unwrap();
        let decoded = ImageCodec::decode(&photo.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (413, 531));
        assert!(decoded.is_opaque());
        // Fully transparent cutout flattens to the background
        assert_eq!(decoded.image().to_rgb8().get_pixel(0, 0).0, [255, 255, 255]);
    }
}
