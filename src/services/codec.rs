//! Raster codec service
//!
//! Decode/encode, flattening, resizing and the single-channel mask primitives
//! (threshold, median, blur, alpha extract/join). Every function returns a new
//! buffer; inputs are never modified.

use crate::{
    config::OutputFormat,
    error::{IdPhotoError, Result},
    services::OutputFormatHandler,
    types::{Mask, RasterImage, Rgb},
};
use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurposeConfig, DecodePaddingMode, GeneralPurpose},
    Engine as _,
};
use image::{
    codecs::jpeg::JpegEncoder, imageops, imageops::FilterType, DynamicImage, GrayImage,
    ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use std::io::Cursor;

/// Standard alphabet, padding optional on decode
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Sharp-style blur floor; smaller sigmas leave the mask untouched
const MIN_BLUR_SIGMA: f32 = 0.3;

/// Service for raster codec operations
pub struct ImageCodec;

impl ImageCodec {
    /// Decode a base64 payload, tolerating a `data:<mime>;base64,` prefix and whitespace
    ///
    /// # Examples
    /// ```rust
    /// use idphoto_backend::services::ImageCodec;
    ///
    /// let bytes = ImageCodec::decode_base64("data:image/png;base64,aGVsbG8=").unwrap();
    /// assert_eq!(bytes, b"hello");
    /// ```
    pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
        let trimmed = payload.trim();
        let body = match trimmed.strip_prefix("data:") {
            Some(rest) => rest
                .split_once(";base64,")
                .map(|(_, data)| data)
                .ok_or_else(|| IdPhotoError::input("Malformed data URI"))?,
            None => trimmed,
        };
        let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if compact.is_empty() {
            return Err(IdPhotoError::input("imageBase64 required"));
        }
        let bytes = PAYLOAD_ENGINE
            .decode(compact.as_bytes())
            .map_err(|e| IdPhotoError::input(format!("Invalid base64 payload: {}", e)))?;
        if bytes.is_empty() {
            return Err(IdPhotoError::input("Decoded image payload is empty"));
        }
        Ok(bytes)
    }

    /// Encode bytes as standard padded base64 (no data-URI prefix)
    #[must_use]
    pub fn encode_base64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    /// Decode image bytes
    ///
    /// The `image` crate yields 8-bit sRGB-interpreted pixel data for every
    /// supported input format.
    pub fn decode(bytes: &[u8]) -> Result<RasterImage> {
        if bytes.is_empty() {
            return Err(IdPhotoError::input("Image buffer is empty"));
        }
        image::load_from_memory(bytes)
            .map(RasterImage::new)
            .map_err(|e| IdPhotoError::input(format!("Unsupported or corrupt image: {}", e)))
    }

    /// Read width and height from the header without decoding pixel data
    pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| IdPhotoError::input(format!("Unreadable image header: {}", e)))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| IdPhotoError::input(format!("Unreadable image header: {}", e)))?;
        if width == 0 || height == 0 {
            return Err(IdPhotoError::geometry(format!(
                "Image reports empty dimensions {}x{}",
                width, height
            )));
        }
        Ok((width, height))
    }

    /// Encode an image; JPEG output drops alpha, so flatten beforehand
    pub fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
        let prepared = OutputFormatHandler::prepare(image.clone(), format);
        let mut buffer = Vec::new();
        let written = match format {
            OutputFormat::Png => {
                prepared.write_to(&mut Cursor::new(&mut buffer), OutputFormatHandler::image_format(format))
            },
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
                prepared.write_with_encoder(encoder)
            },
        };
        written.map_err(|e| {
            IdPhotoError::encode(format!(
                "Failed to encode {}x{} image as {}: {}",
                image.width(),
                image.height(),
                format,
                e
            ))
        })?;
        Ok(buffer)
    }

    /// Encode as PNG, keeping alpha
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        Self::encode(image, OutputFormat::Png, 100)
    }

    /// Re-encode arbitrary image bytes as RGBA PNG
    pub fn normalize_to_png(bytes: &[u8]) -> Result<Vec<u8>> {
        let raster = Self::decode(bytes)?;
        let mut buffer = Vec::new();
        DynamicImage::ImageRgba8(raster.image().to_rgba8())
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .map_err(|e| IdPhotoError::encode(format!("Failed to normalize image to PNG: {}", e)))?;
        Ok(buffer)
    }

    /// Composite onto a solid background, producing an opaque image
    #[must_use]
    pub fn flatten(image: &DynamicImage, background: Rgb) -> RgbImage {
        if !image.color().has_alpha() {
            return image.to_rgb8();
        }
        let rgba = image.to_rgba8();
        let [bg_r, bg_g, bg_b] = background.channels();
        RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            let [r, g, b, a] = rgba.get_pixel(x, y).0;
            let alpha = u32::from(a);
            let blend = |fg: u8, back: u8| {
                ((u32::from(fg) * alpha + u32::from(back) * (255 - alpha) + 127) / 255) as u8
            };
            image::Rgb([blend(r, bg_r), blend(g, bg_g), blend(b, bg_b)])
        })
    }

    /// Resize by the same factor on both axes; each side is at least one pixel
    #[must_use]
    pub fn resize_uniform(image: &DynamicImage, scale: f64) -> DynamicImage {
        let width = ((f64::from(image.width()) * scale).round() as u32).max(1);
        let height = ((f64::from(image.height()) * scale).round() as u32).max(1);
        if (width, height) == (image.width(), image.height()) {
            return image.clone();
        }
        image.resize_exact(width, height, FilterType::Lanczos3)
    }

    /// Place `subject` on a transparent canvas at (left, top)
    #[must_use]
    pub fn place_on_canvas(
        canvas_width: u32,
        canvas_height: u32,
        subject: &RgbaImage,
        left: i64,
        top: i64,
    ) -> RgbaImage {
        let mut canvas = RgbaImage::new(canvas_width, canvas_height);
        imageops::overlay(&mut canvas, subject, left, top);
        canvas
    }

    /// Alpha channel as a mask; images without alpha yield a fully opaque mask
    #[must_use]
    pub fn extract_alpha(image: &RasterImage) -> Mask {
        let (width, height) = image.dimensions();
        if !image.has_alpha() {
            return Mask::from_luma(GrayImage::from_pixel(width, height, image::Luma([u8::MAX])));
        }
        let rgba = image.image().to_rgba8();
        Mask::from_luma(GrayImage::from_fn(width, height, |x, y| {
            image::Luma([rgba.get_pixel(x, y)[3]])
        }))
    }

    /// Replace the alpha channel, leaving RGB untouched
    pub fn join_alpha(image: &RasterImage, mask: &Mask) -> Result<RasterImage> {
        if !mask.matches(image) {
            return Err(IdPhotoError::processing_stage_error(
                "join alpha",
                &format!(
                    "mask is {}x{} but image is {}x{}",
                    mask.width(),
                    mask.height(),
                    image.width(),
                    image.height()
                ),
                None,
            ));
        }
        let mut rgba = image.image().to_rgba8();
        for (pixel, &alpha) in rgba.pixels_mut().zip(mask.as_raw()) {
            pixel[3] = alpha;
        }
        Ok(RasterImage::new(DynamicImage::ImageRgba8(rgba)))
    }

    /// Binary threshold: 255 where value >= `level`, else 0
    #[must_use]
    pub fn threshold(mask: &Mask, level: u8) -> Mask {
        let mut luma = GrayImage::new(mask.width(), mask.height());
        for (out, &value) in luma.iter_mut().zip(mask.as_raw()) {
            *out = if value >= level { u8::MAX } else { 0 };
        }
        Mask::from_luma(luma)
    }

    /// Square median filter of side `size` with edge replication
    ///
    /// Even sizes use the window `[-size/2, size/2 - 1]` and the upper median.
    #[must_use]
    pub fn median(mask: &Mask, size: u32) -> Mask {
        if size <= 1 || mask.width() == 0 || mask.height() == 0 {
            return mask.clone();
        }
        let (width, height) = (i64::from(mask.width()), i64::from(mask.height()));
        let raw = mask.as_raw();
        let half = i64::from(size / 2);
        let span = i64::from(size);
        let mut window = Vec::with_capacity((size * size) as usize);

        let luma = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
            window.clear();
            for dy in 0..span {
                let sy = (i64::from(y) + dy - half).clamp(0, height - 1);
                for dx in 0..span {
                    let sx = (i64::from(x) + dx - half).clamp(0, width - 1);
                    window.push(raw.get((sy * width + sx) as usize).copied().unwrap_or(0));
                }
            }
            window.sort_unstable();
            image::Luma([window.get(window.len() / 2).copied().unwrap_or(0)])
        });
        Mask::from_luma(luma)
    }

    /// Gaussian blur; sigmas below 0.3 (or non-finite) return the mask unchanged
    pub fn blur(mask: &Mask, sigma: f32) -> Result<Mask> {
        if !sigma.is_finite() || sigma < MIN_BLUR_SIGMA {
            return Ok(mask.clone());
        }
        let luma = mask.to_luma()?;
        Ok(Mask::from_luma(imageops::blur(&luma, sigma)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    fn mask_from(values: &[u8], width: u32, height: u32) -> Mask {
        Mask::new(values.to_vec(), width, height).unwrap()
    }

    #[test]
    fn test_decode_base64_variants() {
        let plain = ImageCodec::decode_base64("aGVsbG8=").unwrap();
        let prefixed = ImageCodec::decode_base64("data:image/jpeg;base64,aGVsbG8=").unwrap();
        let unpadded = ImageCodec::decode_base64("aGVsbG8").unwrap();
        let wrapped = ImageCodec::decode_base64("aGVs\nbG8=\n").unwrap();
        assert_eq!(plain, b"hello");
        assert_eq!(prefixed, plain);
        assert_eq!(unpadded, plain);
        assert_eq!(wrapped, plain);
    }

    #[test]
    fn test_decode_base64_rejects_garbage() {
        assert!(matches!(ImageCodec::decode_base64(""), Err(IdPhotoError::Input(_))));
        assert!(matches!(ImageCodec::decode_base64("data:image/png,abc"), Err(IdPhotoError::Input(_))));
        assert!(matches!(ImageCodec::decode_base64("@@@@"), Err(IdPhotoError::Input(_))));
    }

    #[test]
    fn test_decode_rejects_non_image() {
        assert!(matches!(ImageCodec::decode(b"not an image"), Err(IdPhotoError::Input(_))));
        assert!(matches!(ImageCodec::decode(&[]), Err(IdPhotoError::Input(_))));
    }

    #[test]
    fn test_encode_roundtrip_dimensions() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(7, 5, Rgba([1, 2, 3, 100])));
        let png = ImageCodec::encode_png(&img).unwrap();
        let decoded = ImageCodec::decode(&png).unwrap();
        assert_eq!(decoded.dimensions(), (7, 5));
        assert!(decoded.has_alpha());

        let jpeg = ImageCodec::encode(&img, OutputFormat::Jpeg, 92).unwrap();
        let decoded = ImageCodec::decode(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (7, 5));
        assert!(!decoded.has_alpha());
        assert_eq!(ImageCodec::probe_dimensions(&jpeg).unwrap(), (7, 5));
    }

    #[test]
    fn test_flatten_blends_with_background() {
        let mut rgba = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([0, 0, 0, 255]));
        let flat = ImageCodec::flatten(&DynamicImage::ImageRgba8(rgba), Rgb::WHITE);
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(flat.get_pixel(1, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_resize_uniform() {
        let img = DynamicImage::new_rgba8(200, 100);
        let scaled = ImageCodec::resize_uniform(&img, 0.5);
        assert_eq!((scaled.width(), scaled.height()), (100, 50));

        let tiny = ImageCodec::resize_uniform(&img, 0.001);
        assert_eq!((tiny.width(), tiny.height()), (1, 1));
    }

    #[test]
    fn test_alpha_extract_and_join() {
        let rgba = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 77]));
        let raster = RasterImage::new(DynamicImage::ImageRgba8(rgba));
        let mask = ImageCodec::extract_alpha(&raster);
        assert!(mask.as_raw().iter().all(|&v| v == 77));

        let opaque = mask_from(&[255; 6], 3, 2);
        let joined = ImageCodec::join_alpha(&raster, &opaque).unwrap();
        let px = joined.image().to_rgba8().get_pixel(0, 0).0;
        assert_eq!(px, [10, 20, 30, 255]);

        let wrong = mask_from(&[0; 4], 2, 2);
        assert!(ImageCodec::join_alpha(&raster, &wrong).is_err());
    }

    #[test]
    fn test_extract_alpha_without_channel() {
        let raster = RasterImage::new(DynamicImage::new_rgb8(2, 2));
        let mask = ImageCodec::extract_alpha(&raster);
        assert!(mask.as_raw().iter().all(|&v| v == 255));
    }

    #[test]
    fn test_threshold() {
        let mask = mask_from(&[0, 179, 180, 255], 2, 2);
        let out = ImageCodec::threshold(&mask, 180);
        assert_eq!(out.as_raw(), &[0, 0, 255, 255]);
    }

    #[test]
    fn test_median_removes_speckle() {
        let mut values = vec![0u8; 25];
        values[12] = 255;
        let mask = mask_from(&values, 5, 5);
        let out = ImageCodec::median(&mask, 3);
        assert!(out.as_raw().iter().all(|&v| v == 0));

        // Size one is the identity
        assert_eq!(ImageCodec::median(&mask, 1), mask);
    }

    #[test]
    fn test_filters_on_thin_strips() {
        // Even window [-2, 1] with replicated edges takes the upper median
        let strip = mask_from(&[0, 255, 255, 0], 4, 1);
        assert_eq!(ImageCodec::median(&strip, 4).as_raw(), &[0, 255, 255, 255]);

        let column = mask_from(&[10, 200, 90], 1, 3);
        assert_eq!(ImageCodec::median(&column, 9).as_raw(), &[10, 90, 90]);
        assert_eq!(ImageCodec::threshold(&column, 90).as_raw(), &[0, 255, 255]);
    }

    #[test]
    fn test_blur_softens_edges() {
        let luma = GrayImage::from_fn(8, 1, |x, _| Luma([if x < 4 { 0 } else { 255 }]));
        let mask = Mask::from_luma(luma);
        let blurred = ImageCodec::blur(&mask, 1.0).unwrap();
        assert_eq!((blurred.width(), blurred.height()), (8, 1));
        assert!(!blurred.is_binary());

        assert_eq!(ImageCodec::blur(&mask, 0.0).unwrap(), mask);
    }
}
