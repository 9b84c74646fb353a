//! Output format handling service
//!
//! Keeps the per-format rules (alpha support, extensions, MIME types, quality
//! ranges) out of the pipeline stages.

use crate::config::OutputFormat;
use image::{DynamicImage, ImageFormat};

/// Service for output format decisions
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Prepare a decoded image for encoding in `format`
    ///
    /// JPEG cannot store alpha, so the alpha channel is dropped. Callers that
    /// care about the background must flatten first.
    ///
    /// # Examples
    /// ```rust
    /// use idphoto_backend::{services::OutputFormatHandler, config::OutputFormat};
    /// use image::DynamicImage;
    ///
    /// let rgba = DynamicImage::new_rgba8(4, 4);
    /// let prepared = OutputFormatHandler::prepare(rgba, OutputFormat::Jpeg);
    /// assert!(!prepared.color().has_alpha());
    /// ```
    #[must_use]
    pub fn prepare(image: DynamicImage, format: OutputFormat) -> DynamicImage {
        match format {
            OutputFormat::Png => match image {
                DynamicImage::ImageRgba8(_) | DynamicImage::ImageRgb8(_) => image,
                other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            },
            OutputFormat::Jpeg => match image {
                DynamicImage::ImageRgb8(_) => image,
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            },
        }
    }

    /// Matching `image` crate format
    #[must_use]
    pub fn image_format(format: OutputFormat) -> ImageFormat {
        match format {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
        }
    }

    /// File extension without the dot
    ///
    /// # Examples
    /// ```rust
    /// use idphoto_backend::{services::OutputFormatHandler, config::OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::extension(OutputFormat::Jpeg), "jpg");
    /// ```
    #[must_use]
    pub fn extension(format: OutputFormat) -> &'static str {
        format.as_str()
    }

    /// MIME type for data URIs and HTTP responses
    #[must_use]
    pub fn content_type(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    /// Check if a format can carry an alpha channel
    #[must_use]
    pub fn supports_transparency(format: OutputFormat) -> bool {
        matches!(format, OutputFormat::Png)
    }

    /// Guess the output format from a file path's extension
    #[must_use]
    pub fn from_path(path: &std::path::Path) -> Option<OutputFormat> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(OutputFormat::parse)
    }

    /// Recommended quality settings as (default, min, max); None for lossless formats
    #[must_use]
    pub fn quality_range(format: OutputFormat) -> Option<(u8, u8, u8)> {
        match format {
            OutputFormat::Jpeg => Some((92, 1, 100)),
            OutputFormat::Png => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::path::Path;

    #[test]
    fn test_prepare_jpeg_drops_alpha() {
        let rgba = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 128]));
        let prepared = OutputFormatHandler::prepare(DynamicImage::ImageRgba8(rgba), OutputFormat::Jpeg);

        match prepared {
            DynamicImage::ImageRgb8(ref img) => assert_eq!(img.dimensions(), (2, 2)),
            _ => panic!("Expected RGB8 image for JPEG format"),
        }
    }

    #[test]
    fn test_prepare_png_keeps_alpha() {
        let la = DynamicImage::new_luma_a8(3, 3);
        let prepared = OutputFormatHandler::prepare(la, OutputFormat::Png);
        assert!(matches!(prepared, DynamicImage::ImageRgba8(_)));

        let gray = DynamicImage::new_luma8(3, 3);
        let prepared = OutputFormatHandler::prepare(gray, OutputFormat::Png);
        assert!(matches!(prepared, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn test_format_metadata() {
        assert_eq!(OutputFormatHandler::content_type(OutputFormat::Jpeg), "image/jpeg");
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::Png));
        assert!(!OutputFormatHandler::supports_transparency(OutputFormat::Jpeg));
        assert_eq!(OutputFormatHandler::quality_range(OutputFormat::Jpeg), Some((92, 1, 100)));
        assert_eq!(OutputFormatHandler::quality_range(OutputFormat::Png), None);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(
            OutputFormatHandler::from_path(Path::new("out/photo.JPEG")),
            Some(OutputFormat::Jpeg)
        );
        assert_eq!(
            OutputFormatHandler::from_path(Path::new("cutout.png")),
            Some(OutputFormat::Png)
        );
        assert_eq!(OutputFormatHandler::from_path(Path::new("sheet.pdf")), None);
    }
}
