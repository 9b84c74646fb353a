//! Matting engine abstraction
//!
//! The orchestrator only ever sees `dyn MattingEngine`; which backend sits
//! behind it is decided once at startup by [`crate::backends::EngineFactory`].

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// External AI background-removal capability
///
/// Implementations are stateless per call: PNG bytes in, PNG bytes with an
/// alpha channel out. Failures (crash, malformed output, model errors) are
/// reported as `IdPhotoError::AiUnavailable`. Timeouts are enforced by the
/// caller, which cancels the call only when [`MattingEngine::preemptible`]
/// says dropping it stops the work.
#[async_trait]
pub trait MattingEngine: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Remove the background from a PNG and return a PNG with alpha
    ///
    /// # Errors
    /// - Engine process or session failure
    /// - Empty or undecodable engine output
    async fn remove_background(&self, png: &[u8]) -> Result<Vec<u8>>;

    /// Dropping an in-flight call stops the underlying work
    ///
    /// Engines that run inference on a blocking thread cannot be stopped
    /// once started; a timed-out call keeps its concurrency slot until the
    /// inference returns.
    fn preemptible(&self) -> bool {
        true
    }
}

/// Shared handle to the configured engine
pub type SharedEngine = Arc<dyn MattingEngine>;
