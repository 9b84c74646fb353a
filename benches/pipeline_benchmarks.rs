use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use idphoto_backend::{
    AlphaMaskRefiner, ComposeEngine, ComposeRequest, HeuristicMatting, ImageCodec, MockEngine,
    OutputFormat, RasterImage, RefineOptions, RemovalOptions, RemovalOrchestrator, ServiceConfig,
    SharedEngine, SheetItem, SheetLayoutEngine, SheetOptions,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::sync::Arc;
use tokio::runtime::Runtime;

const SIZES: [u32; 3] = [256, 512, 1024];

/// Light wall with a darker oval standing in for a head and shoulders
fn portrait(side: u32) -> RgbaImage {
    let (cx, cy) = (f64::from(side) / 2.0, f64::from(side) * 0.6);
    let (rx, ry) = (f64::from(side) * 0.3, f64::from(side) * 0.45);
    RgbaImage::from_fn(side, side, |x, y| {
        let dx = (f64::from(x) - cx) / rx;
        let dy = (f64::from(y) - cy) / ry;
        if dx * dx + dy * dy <= 1.0 {
            Rgba([60, 45, 40, 255])
        } else {
            Rgba([235, 235, 232, 255])
        }
    })
}

/// Soft-edged cutout: alpha ramps down away from the center
fn cutout(side: u32) -> RasterImage {
    let center = f64::from(side) / 2.0;
    let img = RgbaImage::from_fn(side, side, |x, y| {
        let d = ((f64::from(x) - center).hypot(f64::from(y) - center) / center).min(1.0);
        Rgba([80, 70, 60, (255.0 * (1.0 - d)) as u8])
    });
    RasterImage::new(DynamicImage::ImageRgba8(img))
}

fn benchmark_heuristic(c: &mut Criterion) {
    let heuristic = HeuristicMatting::new();
    let mut group = c.benchmark_group("heuristic_matting");
    for side in SIZES {
        let image = RasterImage::new(DynamicImage::ImageRgba8(portrait(side)));
        group.bench_with_input(BenchmarkId::from_parameter(side), &image, |b, image| {
            b.iter(|| black_box(heuristic.replace_background(image)));
        });
    }
    group.finish();
}

fn benchmark_refine(c: &mut Criterion) {
    let options = RefineOptions::default();
    let mut group = c.benchmark_group("alpha_refine");
    group.sample_size(20);
    for side in SIZES {
        let image = cutout(side);
        group.bench_with_input(BenchmarkId::from_parameter(side), &image, |b, image| {
            b.iter(|| black_box(AlphaMaskRefiner::refine(image, &options)));
        });
    }
    group.finish();
}

fn benchmark_compose(c: &mut Criterion) {
    let engine = ComposeEngine::from_config(&ServiceConfig::default());
    let request = ComposeRequest {
        format: OutputFormat::Jpeg,
        ..ComposeRequest::default()
    };
    let mut group = c.benchmark_group("compose");
    group.sample_size(20);
    for side in SIZES {
        let image = cutout(side);
        group.bench_with_input(BenchmarkId::from_parameter(side), &image, |b, image| {
            b.iter(|| black_box(engine.compose(image, &request).unwrap()));
        });
    }
    group.finish();
}

fn benchmark_removal(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let config = ServiceConfig::default();
    let engine: SharedEngine = Arc::new(MockEngine::succeeding());
    let orchestrator = RemovalOrchestrator::new(Some(engine), &config);
    let options = RemovalOptions::default();
    let input = ImageCodec::encode_png(&DynamicImage::ImageRgba8(portrait(512))).unwrap();

    let mut group = c.benchmark_group("removal_orchestrator");
    group.sample_size(10);
    group.bench_function("mock_engine_512", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    orchestrator
                        .remove_encoded(&input, &options, OutputFormat::Jpeg)
                        .await
                        .unwrap(),
                )
            })
        });
    });
    group.finish();
}

fn benchmark_sheet(c: &mut Criterion) {
    let photo = ImageCodec::encode(
        &DynamicImage::ImageRgba8(portrait(413)),
        OutputFormat::Jpeg,
        92,
    )
    .unwrap();
    let items = vec![SheetItem::new(photo).with_mm_size(35.0, 45.0)];
    let options = SheetOptions::default();

    let mut group = c.benchmark_group("sheet_layout");
    group.sample_size(10);
    group.bench_function("a4_fill_pdf", |b| {
        b.iter(|| black_box(SheetLayoutEngine::render_pdf(&items, &options).unwrap()));
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_heuristic,
    benchmark_refine,
    benchmark_compose,
    benchmark_removal,
    benchmark_sheet
);
criterion_main!(benches);
