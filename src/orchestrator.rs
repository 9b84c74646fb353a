//! Background removal orchestration
//!
//! AI first, heuristic fallback. The engine is called at most once per
//! request, under a concurrency permit and a timeout; every failure it can
//! produce (error, garbage output, timeout) is handled the same way. Whether
//! that failure is surfaced or replaced by the heuristic depends on the
//! request and on [`TransparentFailurePolicy`].

use crate::{
    config::{OutputFormat, ServiceConfig, TransparentFailurePolicy},
    error::{IdPhotoError, Result},
    heuristic::HeuristicMatting,
    inference::SharedEngine,
    services::ImageCodec,
    types::{CutoutResult, EncodedCutout, RasterImage, RemovalMode, Rgb},
};
use image::{DynamicImage, RgbaImage};
use instant::Instant;
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::instrument;

/// Per-call removal switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalOptions {
    /// Keep the cutout's alpha channel in the result
    pub transparent: bool,
    /// An explicit replacement background was requested; AI failure is fatal
    pub strict_replace: bool,
    /// Background used whenever the result is flattened
    pub background: Rgb,
    /// Try the AI engine before the heuristic
    pub allow_ai: bool,
}

impl Default for RemovalOptions {
    fn default() -> Self {
        Self {
            transparent: false,
            strict_replace: false,
            background: Rgb::WHITE,
            allow_ai: true,
        }
    }
}

/// Raster encoder used for results
type Encoder = fn(&DynamicImage, OutputFormat, u8) -> Result<Vec<u8>>;

/// AI-first background remover with heuristic fallback and rescue
pub struct RemovalOrchestrator {
    engine: Option<SharedEngine>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    policy: TransparentFailurePolicy,
    jpeg_quality: u8,
    heuristic: HeuristicMatting,
    encoder: Encoder,
}

impl std::fmt::Debug for RemovalOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovalOrchestrator")
            .field("engine", &self.engine_name())
            .field("available_permits", &self.permits.available_permits())
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RemovalOrchestrator {
    /// Create an orchestrator around an optional engine
    #[must_use]
    pub fn new(engine: Option<SharedEngine>, config: &ServiceConfig) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(config.max_concurrent_matting.max(1))),
            timeout: config.matting_timeout(),
            policy: config.transparent_failure_policy,
            jpeg_quality: config.jpeg_quality,
            heuristic: HeuristicMatting::new(),
            encoder: ImageCodec::encode,
        }
    }

    #[cfg(test)]
    fn with_encoder(mut self, encoder: Encoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Name of the active engine, if any
    #[must_use]
    pub fn engine_name(&self) -> Option<&str> {
        self.engine.as_ref().map(|engine| engine.name())
    }

    #[must_use]
    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Remove the background from encoded image bytes
    ///
    /// # Errors
    /// - `Input` when the bytes cannot be decoded
    /// - `AiUnavailable` when the engine failed and no fallback is allowed
    pub async fn remove(&self, input: &[u8], options: &RemovalOptions) -> Result<CutoutResult> {
        let original = Self::decode(input).await?;
        self.remove_decoded(original, options).await
    }

    /// Remove the background from an already decoded image
    #[instrument(skip_all, fields(
        transparent = options.transparent,
        strict = options.strict_replace,
        allow_ai = options.allow_ai
    ))]
    pub async fn remove_decoded(
        &self,
        original: RasterImage,
        options: &RemovalOptions,
    ) -> Result<CutoutResult> {
        let start = Instant::now();
        let engine = match &self.engine {
            Some(engine) if options.allow_ai => engine,
            _ => {
                let result = self.fast(original, options.background, RemovalMode::Fast).await?;
                tracing::debug!(mode = %result.mode, elapsed_ms = start.elapsed().as_millis(), "Background removed");
                return Ok(result);
            },
        };

        let result = match self.run_engine(engine, &original).await {
            Ok(cutout) => {
                let finished = blocking("finish_cutout", {
                    let options = *options;
                    move || Ok(Self::finish_ai(cutout, &options))
                })
                .await;
                match finished {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(error = %e, "Cutout post-processing failed, rescuing with heuristic");
                        self.fast(original, options.background, RemovalMode::FastRescue)
                            .await?
                    },
                }
            },
            Err(e) => {
                if options.strict_replace {
                    tracing::warn!(error = %e, "AI matting failed under strict replacement");
                    return Err(e);
                }
                if options.transparent && self.policy == TransparentFailurePolicy::HardFail {
                    tracing::warn!(error = %e, "AI matting failed while transparency was requested");
                    return Err(e);
                }
                tracing::warn!(error = %e, "AI matting failed, falling back to heuristic");
                self.fast(original, options.background, RemovalMode::FastFallback)
                    .await?
            },
        };

        tracing::debug!(
            mode = %result.mode,
            transparent = result.transparent,
            elapsed_ms = start.elapsed().as_millis(),
            "Background removed"
        );
        Ok(result)
    }

    /// Remove the background and encode the result
    ///
    /// Transparent results are always PNG. An encode failure after an AI
    /// cutout is rescued by running the heuristic on the original input.
    ///
    /// # Errors
    /// - Same as [`Self::remove`]
    /// - `Encode` when even the heuristic result cannot be encoded
    pub async fn remove_encoded(
        &self,
        input: &[u8],
        options: &RemovalOptions,
        format: OutputFormat,
    ) -> Result<EncodedCutout> {
        let original = Self::decode(input).await?;
        let cutout = self.remove_decoded(original.clone(), options).await?;
        let mode = cutout.mode;

        match self.encode(cutout, format).await {
            Ok(encoded) => Ok(encoded),
            Err(e) if !mode.is_heuristic() => {
                tracing::warn!(error = %e, mode = %mode, "Encoding AI cutout failed, rescuing with heuristic");
                let rescued = self
                    .fast(original, options.background, RemovalMode::FastRescue)
                    .await?;
                self.encode(rescued, format).await
            },
            Err(e) => Err(e),
        }
    }

    /// Run the engine on a tiny probe image and report the output size
    ///
    /// # Errors
    /// - `AiUnavailable` when no engine is configured or the call fails
    pub async fn selftest(&self) -> Result<usize> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| IdPhotoError::ai_unavailable("AI matting is disabled"))?;
        let probe = ImageCodec::encode_png(&DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            1,
            1,
            image::Rgba([255, 255, 255, 255]),
        )))?;
        let out = self.call_engine(engine, &probe).await?;
        Ok(out.len())
    }

    async fn decode(input: &[u8]) -> Result<RasterImage> {
        let bytes = input.to_vec();
        blocking("decode", move || ImageCodec::decode(&bytes)).await
    }

    /// Normalize to PNG, call the engine and decode its answer
    async fn run_engine(&self, engine: &SharedEngine, original: &RasterImage) -> Result<RasterImage> {
        let png = blocking("normalize", {
            let image = original.image().clone();
            move || ImageCodec::encode_png(&image)
        })
        .await
        .map_err(|e| IdPhotoError::ai_unavailable(format!("Could not prepare engine input: {}", e)))?;

        let out = self.call_engine(engine, &png).await?;

        blocking("decode_cutout", move || ImageCodec::decode(&out))
            .await
            .map_err(|e| IdPhotoError::engine_failure(engine.name(), &format!("unreadable output: {}", e)))
    }

    /// One engine call under a concurrency permit and the configured timeout
    ///
    /// The call runs as its own task holding the permit. On timeout a
    /// preemptible engine is cancelled; any other engine keeps the permit
    /// until its inference returns, so the pool never runs more inferences
    /// than it has permits.
    async fn call_engine(&self, engine: &SharedEngine, png: &[u8]) -> Result<Vec<u8>> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| IdPhotoError::ai_unavailable(format!("Matting pool closed: {}", e)))?;

        let start = Instant::now();
        let mut task = tokio::spawn({
            let engine = Arc::clone(engine);
            let png = png.to_vec();
            async move {
                let _permit = permit;
                engine.remove_background(&png).await
            }
        });

        let out = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => joined.map_err(|e| {
                IdPhotoError::engine_failure(engine.name(), &format!("engine task failed: {}", e))
            })??,
            Err(_) => {
                if engine.preemptible() {
                    task.abort();
                } else {
                    tracing::warn!(
                        engine = engine.name(),
                        "Engine cannot be interrupted, its slot stays busy until inference returns"
                    );
                }
                return Err(IdPhotoError::engine_failure(
                    engine.name(),
                    &format!("timed out after {} ms", self.timeout.as_millis()),
                ));
            },
        };
        tracing::debug!(
            engine = engine.name(),
            bytes = out.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Matting engine answered"
        );
        Ok(out)
    }

    fn finish_ai(cutout: RasterImage, options: &RemovalOptions) -> CutoutResult {
        if options.strict_replace {
            return CutoutResult {
                pixels: flattened(&cutout, options.background),
                mode: RemovalMode::AiReplace,
                transparent: false,
            };
        }
        if options.transparent {
            return CutoutResult {
                pixels: RasterImage::new(DynamicImage::ImageRgba8(cutout.into_image().into_rgba8())),
                mode: RemovalMode::Ai,
                transparent: true,
            };
        }
        CutoutResult {
            pixels: flattened(&cutout, options.background),
            mode: RemovalMode::Ai,
            transparent: false,
        }
    }

    async fn fast(&self, original: RasterImage, background: Rgb, mode: RemovalMode) -> Result<CutoutResult> {
        let heuristic = self.heuristic;
        let pixels = blocking("heuristic", move || {
            Ok(heuristic.replace_background_with(&original, background))
        })
        .await?;
        Ok(CutoutResult {
            pixels,
            mode,
            transparent: false,
        })
    }

    async fn encode(&self, cutout: CutoutResult, requested: OutputFormat) -> Result<EncodedCutout> {
        let format = if cutout.transparent {
            OutputFormat::Png
        } else {
            requested
        };
        let quality = self.jpeg_quality;
        let encoder = self.encoder;
        let CutoutResult {
            pixels,
            mode,
            transparent,
        } = cutout;
        let bytes = blocking("encode", move || encoder(pixels.image(), format, quality))
            .await?;
        Ok(EncodedCutout {
            bytes,
            format,
            mode,
            transparent,
        })
    }
}

fn flattened(image: &RasterImage, background: Rgb) -> RasterImage {
    RasterImage::new(DynamicImage::ImageRgb8(ImageCodec::flatten(image.image(), background)))
}

/// Run CPU-bound work off the async workers
async fn blocking<T, F>(stage: &'static str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| IdPhotoError::processing_stage_error(stage, &e.to_string(), None))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockEngine;
    use image::Rgba;

    const BACKDROP: Rgba<u8> = Rgba([120, 120, 120, 255]);
    const SUBJECT: Rgba<u8> = Rgba([20, 140, 200, 255]);

    fn portrait_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(16, 16, |x, y| {
            if (5..11).contains(&x) && (5..11).contains(&y) {
                SUBJECT
            } else {
                BACKDROP
            }
        });
        ImageCodec::encode_png(&DynamicImage::ImageRgba8(img)).unwrap()
    }

    fn orchestrator(engine: MockEngine, config: &ServiceConfig) -> (RemovalOrchestrator, Arc<MockEngine>) {
        let engine = Arc::new(engine);
        let shared: SharedEngine = engine.clone();
        (RemovalOrchestrator::new(Some(shared), config), engine)
    }

    fn opts(transparent: bool) -> RemovalOptions {
        RemovalOptions {
            transparent,
            ..RemovalOptions::default()
        }
    }

    #[tokio::test]
    async fn test_ai_success_honours_transparency() {
        let (orch, engine) = orchestrator(MockEngine::succeeding(), &ServiceConfig::default());

        let result = orch.remove(&portrait_png(), &opts(true)).await.unwrap();
        assert_eq!(result.mode, RemovalMode::Ai);
        assert!(result.transparent);
        assert!(result.pixels.has_alpha());
        assert!(!result.pixels.is_opaque());

        let result = orch.remove(&portrait_png(), &opts(false)).await.unwrap();
        assert_eq!(result.mode, RemovalMode::Ai);
        assert!(!result.transparent);
        assert!(result.pixels.is_opaque());
        assert_eq!(result.pixels.image().to_rgb8().get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_ai_failure_falls_back_when_opaque() {
        let (orch, _) = orchestrator(MockEngine::failing("offline"), &ServiceConfig::default());
        let result = orch.remove(&portrait_png(), &opts(false)).await.unwrap();
        assert_eq!(result.mode, RemovalMode::FastFallback);
        assert!(!result.transparent);
        assert!(result.pixels.is_opaque());
    }

    #[tokio::test]
    async fn test_transparent_failure_policy() {
        let (orch, _) = orchestrator(MockEngine::failing("offline"), &ServiceConfig::default());
        let err = orch.remove(&portrait_png(), &opts(true)).await.unwrap_err();
        assert!(matches!(err, IdPhotoError::AiUnavailable(_)));

        let config = ServiceConfig::builder()
            .transparent_failure_policy(TransparentFailurePolicy::OpaqueFallback)
            .build()
            .unwrap();
        let (orch, _) = orchestrator(MockEngine::failing("offline"), &config);
        let result = orch.remove(&portrait_png(), &opts(true)).await.unwrap();
        assert_eq!(result.mode, RemovalMode::FastFallback);
        assert!(!result.transparent);
    }

    #[tokio::test]
    async fn test_strict_replace() {
        let options = RemovalOptions {
            strict_replace: true,
            background: Rgb::new(0, 0, 255),
            ..RemovalOptions::default()
        };

        let (orch, _) = orchestrator(MockEngine::succeeding(), &ServiceConfig::default());
        let result = orch.remove(&portrait_png(), &options).await.unwrap();
        assert_eq!(result.mode, RemovalMode::AiReplace);
        assert!(!result.transparent);
        assert_eq!(result.pixels.image().to_rgb8().get_pixel(0, 0).0, [0, 0, 255]);

        let (orch, _) = orchestrator(MockEngine::failing("offline"), &ServiceConfig::default());
        let err = orch.remove(&portrait_png(), &options).await.unwrap_err();
        assert!(matches!(err, IdPhotoError::AiUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fast_path_skips_engine() {
        let (orch, engine) = orchestrator(MockEngine::succeeding(), &ServiceConfig::default());
        let options = RemovalOptions {
            allow_ai: false,
            ..RemovalOptions::default()
        };
        let result = orch.remove(&portrait_png(), &options).await.unwrap();
        assert_eq!(result.mode, RemovalMode::Fast);
        assert_eq!(engine.calls(), 0);

        let orch = RemovalOrchestrator::new(None, &ServiceConfig::default());
        let result = orch.remove(&portrait_png(), &opts(true)).await.unwrap();
        assert_eq!(result.mode, RemovalMode::Fast);
        assert!(!result.transparent);
    }

    #[tokio::test]
    async fn test_garbage_and_timeout_count_as_failures() {
        let (orch, _) = orchestrator(MockEngine::garbage(), &ServiceConfig::default());
        let result = orch.remove(&portrait_png(), &opts(false)).await.unwrap();
        assert_eq!(result.mode, RemovalMode::FastFallback);

        let config = ServiceConfig::builder().matting_timeout_ms(50).build().unwrap();
        let (orch, engine) = orchestrator(MockEngine::hanging(), &config);
        let result = orch.remove(&portrait_png(), &opts(false)).await.unwrap();
        assert_eq!(result.mode, RemovalMode::FastFallback);
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_input_is_rejected() {
        let (orch, engine) = orchestrator(MockEngine::succeeding(), &ServiceConfig::default());
        let err = orch.remove(b"not an image", &opts(false)).await.unwrap_err();
        assert!(matches!(err, IdPhotoError::Input(_)));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_engine_calls_are_bounded() {
        let config = ServiceConfig::builder().max_concurrent_matting(1).build().unwrap();
        let (orch, engine) = orchestrator(
            MockEngine::succeeding().with_delay(Duration::from_millis(20)),
            &config,
        );
        let input = portrait_png();
        let options = opts(false);
        let calls = (0..4).map(|_| orch.remove(&input, &options));
        let results = futures_util::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(engine.calls(), 4);
        assert_eq!(engine.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_inference_keeps_its_permit() {
        let config = ServiceConfig::builder()
            .max_concurrent_matting(1)
            .matting_timeout_ms(50)
            .build()
            .unwrap();
        let (orch, engine) = orchestrator(
            MockEngine::succeeding()
                .with_delay(Duration::from_millis(400))
                .non_preemptible(),
            &config,
        );

        let result = orch.remove(&portrait_png(), &opts(false)).await.unwrap();
        assert_eq!(result.mode, RemovalMode::FastFallback);
        // Inference is still running and still owns the only slot
        assert_eq!(engine.in_flight(), 1);
        assert_eq!(orch.permits.available_permits(), 0);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(orch.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_preemptible_call_is_cancelled() {
        let config = ServiceConfig::builder()
            .max_concurrent_matting(1)
            .matting_timeout_ms(50)
            .build()
            .unwrap();
        let (orch, engine) = orchestrator(MockEngine::hanging(), &config);

        let result = orch.remove(&portrait_png(), &opts(false)).await.unwrap();
        assert_eq!(result.mode, RemovalMode::FastFallback);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(orch.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_transparent_output_is_always_png() {
        let (orch, _) = orchestrator(MockEngine::succeeding(), &ServiceConfig::default());
        let encoded = orch
            .remove_encoded(&portrait_png(), &opts(true), OutputFormat::Jpeg)
            .await
            .unwrap();
        assert_eq!(encoded.format, OutputFormat::Png);
        assert!(encoded.transparent);
        assert!(ImageCodec::decode(&encoded.bytes).unwrap().has_alpha());

        let encoded = orch
            .remove_encoded(&portrait_png(), &opts(false), OutputFormat::Jpeg)
            .await
            .unwrap();
        assert_eq!(encoded.format, OutputFormat::Jpeg);
        assert!(!ImageCodec::decode(&encoded.bytes).unwrap().has_alpha());
    }

    #[tokio::test]
    async fn test_encode_failure_after_ai_is_rescued() {
        fn png_fails(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
            match format {
                OutputFormat::Png => Err(IdPhotoError::encode("png writer failed")),
                _ => ImageCodec::encode(image, format, quality),
            }
        }

        let (orch, engine) = orchestrator(MockEngine::succeeding(), &ServiceConfig::default());
        let orch = orch.with_encoder(png_fails);
        let encoded = orch
            .remove_encoded(&portrait_png(), &opts(true), OutputFormat::Jpeg)
            .await
            .unwrap();

        assert_eq!(encoded.mode, RemovalMode::FastRescue);
        assert!(!encoded.transparent);
        assert_eq!(encoded.format, OutputFormat::Jpeg);
        assert!(encoded.bytes.starts_with(&[0xFF, 0xD8]));
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_heuristic_encode_failure_is_not_rescued() {
        fn always_fails(_: &DynamicImage, _: OutputFormat, _: u8) -> Result<Vec<u8>> {
            Err(IdPhotoError::encode("writer failed"))
        }

        let (orch, _) = orchestrator(MockEngine::succeeding(), &ServiceConfig::default());
        let orch = orch.with_encoder(always_fails);

        let err = orch
            .remove_encoded(&portrait_png(), &opts(true), OutputFormat::Png)
            .await
            .unwrap_err();
        assert!(matches!(err, IdPhotoError::Encode(_)));

        let fast = RemovalOptions {
            allow_ai: false,
            ..RemovalOptions::default()
        };
        let err = orch
            .remove_encoded(&portrait_png(), &fast, OutputFormat::Jpeg)
            .await
            .unwrap_err();
        assert!(matches!(err, IdPhotoError::Encode(_)));
    }

    #[tokio::test]
    async fn test_selftest() {
        let (orch, _) = orchestrator(MockEngine::succeeding(), &ServiceConfig::default());
        assert!(orch.selftest().await.unwrap() > 0);

        let orch = RemovalOrchestrator::new(None, &ServiceConfig::default());
        assert!(matches!(orch.selftest().await, Err(IdPhotoError::AiUnavailable(_))));
    }
}
