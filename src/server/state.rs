use crate::{
    backends::EngineFactory,
    compose::ComposeEngine,
    config::ServiceConfig,
    error::Result,
    inference::SharedEngine,
    orchestrator::RemovalOrchestrator,
    presets::SizeCatalog,
};
use std::sync::Arc;

/// Shared application state injected into all route handlers via axum extractors
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub orchestrator: Arc<RemovalOrchestrator>,
    pub composer: Arc<ComposeEngine>,
    /// Loaded once at startup, served verbatim
    pub sizes: Arc<SizeCatalog>,
}

impl AppState {
    /// Assemble state around an already-built engine
    #[must_use]
    pub fn new(config: ServiceConfig, engine: Option<SharedEngine>, sizes: SizeCatalog) -> Self {
        Self {
            orchestrator: Arc::new(RemovalOrchestrator::new(engine, &config)),
            composer: Arc::new(ComposeEngine::from_config(&config)),
            sizes: Arc::new(sizes),
            config: Arc::new(config),
        }
    }

    /// Build the engine and load the size catalog from the configuration
    pub async fn from_config(config: ServiceConfig) -> Result<Self> {
        let engine = EngineFactory::create(&config).await?;
        let sizes = SizeCatalog::load(&config.sizes_path);
        Ok(Self::new(config, engine, sizes))
    }
}
