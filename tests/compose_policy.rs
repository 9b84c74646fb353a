//! Canvas composition with and without policy presets

use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use idphoto_backend::{
    presets::DV_LOTTERY_KEY, AutoAdjustSpec, ComposeEngine, ComposeRequest, HeadBox, IdPhotoError,
    ImageCodec, OutputFormat, Rgb, ServiceConfig,
};

const RED: Rgba<u8> = Rgba([220, 20, 20, 255]);

fn opaque_cutout(width: u32, height: u32) -> Vec<u8> {
    ImageCodec::encode_png(&DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, RED))).unwrap()
}

fn engine() -> ComposeEngine {
    ComposeEngine::from_config(&ServiceConfig::default())
}

#[test]
fn test_small_cutout_is_centered_without_upscaling() {
    let request = ComposeRequest {
        width: 300,
        height: 300,
        background: Rgb::new(0, 0, 255),
        format: OutputFormat::Png,
        ..ComposeRequest::default()
    };

    let photo = engine().compose_bytes(&opaque_cutout(100, 200), &request).unwrap();
    assert_eq!((photo.width, photo.height), (300, 300));
    assert_eq!(photo.placement.scale, 1.0);
    assert_eq!((photo.placement.left, photo.placement.top), (100, 50));

    let image = ImageCodec::decode(&photo.bytes).unwrap().into_image().to_rgb8();
    assert_eq!(image.get_pixel(10, 150).0, [0, 0, 255]);
    assert_eq!(image.get_pixel(150, 150).0, [220, 20, 20]);
}

#[test]
fn test_default_preset_forces_square_white_jpeg() {
    let request = ComposeRequest {
        width: 400,
        height: 900,
        background: Rgb::new(0, 0, 0),
        format: OutputFormat::Png,
        template_key: Some(DV_LOTTERY_KEY.to_string()),
        auto_adjust: None,
    };

    let photo = engine().compose_bytes(&opaque_cutout(60, 80), &request).unwrap();
    assert_eq!((photo.width, photo.height), (600, 600));
    assert_eq!(photo.format, OutputFormat::Jpeg);
    assert!(photo.bytes.starts_with(&[0xFF, 0xD8]));

    let image = ImageCodec::decode(&photo.bytes).unwrap();
    assert_eq!(image.dimensions(), (600, 600));
    // JPEG is lossy; the margin must still read as white
    let corner = image.image().to_rgb8().get_pixel(5, 5).0;
    assert!(corner.iter().all(|&c| c > 245), "corner was {:?}", corner);
}

#[test]
fn test_presets_come_from_configuration() {
    let config = ServiceConfig::from_toml_str(
        r#"
        [[presets]]
        key = "eu:passport"
        min_side = 400
        max_side = 500
        background = { r = 240, g = 240, b = 240 }
        format = "png"
        "#,
    )
    .unwrap();
    let engine = ComposeEngine::from_config(&config);

    let request = ComposeRequest {
        width: 1000,
        template_key: Some("EU:Passport".to_string()),
        ..ComposeRequest::default()
    };
    let canvas = engine.resolve(&request);
    assert_eq!((canvas.width, canvas.height), (500, 500));
    assert_eq!(canvas.background, Rgb::new(240, 240, 240));
    assert_eq!(canvas.format, OutputFormat::Png);

    // The configured table replaces the built-in one
    let request = ComposeRequest {
        template_key: Some(DV_LOTTERY_KEY.to_string()),
        ..ComposeRequest::default()
    };
    assert!(engine.resolve(&request).preset.is_none());
}

#[test]
fn test_auto_adjust_scales_head_into_range() {
    let request = ComposeRequest {
        width: 600,
        height: 600,
        auto_adjust: Some(AutoAdjustSpec::new(HeadBox {
            top: 100.0,
            bottom: 700.0,
        })),
        ..ComposeRequest::default()
    };

    let photo = engine().compose_bytes(&opaque_cutout(400, 400), &request).unwrap();
    // 0.595 * 600 / 600
    assert!((photo.placement.initial_scale - 0.595).abs() < 1e-9);
    assert!((photo.placement.scale - 0.595).abs() < 1e-9);
    assert_eq!(photo.placement.scaled_width, 238);
    assert!(photo.placement.top + photo.placement.scaled_height <= 600);
}

#[test]
fn test_unreadable_cutout_is_rejected() {
    let err = engine()
        .compose_bytes(b"garbage", &ComposeRequest::default())
        .unwrap_err();
    assert!(matches!(err, IdPhotoError::Input(_)));
}
