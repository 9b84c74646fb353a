//! Interchangeable matting engine backends
//!
//! - Subprocess backend (external `rembg` shim, the default)
//! - ONNX Runtime backend (embedded, feature `onnx`)
//! - Tract backend (embedded pure Rust, feature `tract`)
//! - Mock backend (deterministic, for tests and benchmarks)

pub mod mock;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod subprocess;
#[cfg(feature = "tract")]
pub mod tract;

pub use self::mock::{MockBehavior, MockEngine};
#[cfg(feature = "onnx")]
pub use self::onnx::OnnxEngine;
pub use self::subprocess::SubprocessEngine;
#[cfg(feature = "tract")]
pub use self::tract::TractEngine;

use crate::{
    config::{EngineKind, ServiceConfig},
    error::{IdPhotoError, Result},
    inference::SharedEngine,
};
use std::sync::Arc;

/// Builds the configured engine once at startup
#[derive(Debug)]
pub struct EngineFactory;

impl EngineFactory {
    /// Create the engine selected by `config`
    ///
    /// Returns `Ok(None)` when AI is disabled or the engine kind is `none`.
    ///
    /// # Errors
    /// - An embedded backend was selected but not compiled in
    /// - The model file could not be provisioned or loaded
    pub async fn create(config: &ServiceConfig) -> Result<Option<SharedEngine>> {
        if config.disable_ai {
            tracing::info!("AI matting disabled by configuration");
            return Ok(None);
        }

        match config.engine {
            EngineKind::None => Ok(None),
            EngineKind::Subprocess => {
                let engine = SubprocessEngine::new(&config.subprocess);
                tracing::info!(command = %engine.command_line(), "Using subprocess matting engine");
                Ok(Some(Arc::new(engine)))
            },
            EngineKind::Onnx => Self::create_onnx(config).await,
            EngineKind::Tract => Self::create_tract(config).await,
        }
    }

    /// Names of the backends compiled into this build
    #[must_use]
    pub fn available() -> Vec<EngineKind> {
        let mut kinds = vec![EngineKind::Subprocess];
        if cfg!(feature = "onnx") {
            kinds.push(EngineKind::Onnx);
        }
        if cfg!(feature = "tract") {
            kinds.push(EngineKind::Tract);
        }
        kinds.push(EngineKind::None);
        kinds
    }

    #[cfg(feature = "onnx")]
    async fn create_onnx(config: &ServiceConfig) -> Result<Option<SharedEngine>> {
        let path = Self::model_store(config)?.ensure_model().await?;
        let engine = tokio::task::spawn_blocking(move || OnnxEngine::from_file(path))
            .await
            .map_err(|e| IdPhotoError::model(format!("Model loading task failed: {}", e)))??;
        Ok(Some(Arc::new(engine)))
    }

    #[cfg(not(feature = "onnx"))]
    async fn create_onnx(_config: &ServiceConfig) -> Result<Option<SharedEngine>> {
        Err(IdPhotoError::invalid_config(
            "engine = onnx requires building with the `onnx` feature",
        ))
    }

    #[cfg(feature = "tract")]
    async fn create_tract(config: &ServiceConfig) -> Result<Option<SharedEngine>> {
        let path = Self::model_store(config)?.ensure_model().await?;
        let engine = tokio::task::spawn_blocking(move || TractEngine::from_file(path))
            .await
            .map_err(|e| IdPhotoError::model(format!("Model loading task failed: {}", e)))??;
        Ok(Some(Arc::new(engine)))
    }

    #[cfg(not(feature = "tract"))]
    async fn create_tract(_config: &ServiceConfig) -> Result<Option<SharedEngine>> {
        Err(IdPhotoError::invalid_config(
            "engine = tract requires building with the `tract` feature",
        ))
    }

    #[cfg(any(feature = "onnx", feature = "tract"))]
    fn model_store(config: &ServiceConfig) -> Result<crate::models::ModelStore> {
        crate::models::ModelStore::new(config.model_dir.clone(), config.model_urls.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_ai_yields_no_engine() {
        let config = ServiceConfig::builder().disable_ai(true).build().unwrap();
        assert!(EngineFactory::create(&config).await.unwrap().is_none());

        let config = ServiceConfig::builder().engine(EngineKind::None).build().unwrap();
        assert!(EngineFactory::create(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subprocess_engine_is_default() {
        let engine = EngineFactory::create(&ServiceConfig::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(engine.name(), "subprocess");
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn test_onnx_without_feature_is_config_error() {
        let config = ServiceConfig::builder().engine(EngineKind::Onnx).build().unwrap();
        let err = EngineFactory::create(&config).await.err().unwrap();
        assert!(matches!(err, IdPhotoError::InvalidConfig(_)));
    }

    #[test]
    fn test_available_backends() {
        let kinds = EngineFactory::available();
        assert_eq!(kinds.first(), Some(&EngineKind::Subprocess));
        assert_eq!(kinds.last(), Some(&EngineKind::None));
    }
}
