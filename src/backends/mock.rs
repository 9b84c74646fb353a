//! Deterministic in-process engine for tests and benchmarks

use crate::{
    error::{IdPhotoError, Result},
    inference::MattingEngine,
    services::ImageCodec,
};
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What a [`MockEngine`] does when called
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Keep the central half of the frame opaque, clear the border
    Cutout,
    /// Fail with `AiUnavailable`
    Fail(String),
    /// Never complete; only a caller timeout ends the call
    Hang,
    /// Return bytes that are not an image
    Garbage,
}

/// Matting engine that needs no model or external process
#[derive(Debug)]
pub struct MockEngine {
    behavior: MockBehavior,
    delay: Option<Duration>,
    preemptible: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockEngine {
    #[must_use]
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            preemptible: true,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Engine that produces a centered rectangular cutout
    #[must_use]
    pub fn succeeding() -> Self {
        Self::new(MockBehavior::Cutout)
    }

    /// Engine that always fails
    #[must_use]
    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self::new(MockBehavior::Fail(message.into()))
    }

    /// Engine that never answers
    #[must_use]
    pub fn hanging() -> Self {
        Self::new(MockBehavior::Hang)
    }

    /// Engine that answers with undecodable bytes
    #[must_use]
    pub fn garbage() -> Self {
        Self::new(MockBehavior::Garbage)
    }

    /// Sleep before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report the engine as one that keeps running after its caller gives up
    #[must_use]
    pub fn non_preemptible(mut self) -> Self {
        self.preemptible = false;
        self
    }

    /// Number of calls currently running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of calls received so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same time
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn cutout(png: &[u8]) -> Result<Vec<u8>> {
        let source = ImageCodec::decode(png)
            .map_err(|e| IdPhotoError::engine_failure("mock", &e.to_string()))?;
        let rgba = source.image().to_rgba8();
        let (width, height) = rgba.dimensions();
        let inside = |x: u32, y: u32| {
            x >= width / 4 && x < width - width / 4 && y >= height / 4 && y < height - height / 4
        };
        let out = RgbaImage::from_fn(width, height, |x, y| {
            let px = rgba.get_pixel(x, y);
            let alpha = if inside(x, y) { u8::MAX } else { 0 };
            Rgba([px[0], px[1], px[2], alpha])
        });
        ImageCodec::encode_png(&DynamicImage::ImageRgba8(out))
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MattingEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn preemptible(&self) -> bool {
        self.preemptible
    }

    async fn remove_background(&self, png: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            MockBehavior::Cutout => Self::cutout(png),
            MockBehavior::Fail(message) => Err(IdPhotoError::engine_failure("mock", message)),
            MockBehavior::Hang => std::future::pending().await,
            MockBehavior::Garbage => Ok(b"definitely not a png".to_vec()),
        }
    }
}
