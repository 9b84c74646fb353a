//! HTTP surface
//!
//! JSON in, JSON out; images travel as base64 strings. The router is built
//! from an [`AppState`] so tests can drive it in-process with a mock engine.

pub mod errors;
pub mod handlers;
pub mod models;
pub mod state;

pub use errors::ApiError;
pub use state::AppState;

use crate::{config::ServiceConfig, error::Result};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Name reported by the informational endpoints
pub const SERVICE_NAME: &str = "idphoto-backend";

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes();
    let cors = cors_layer(&state.config.cors_origin);

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/sizes", get(handlers::sizes))
        .route("/bg-remove", post(handlers::bg_remove))
        .route("/bg-remove/selftest-lite", get(handlers::selftest_lite))
        .route("/bg-remove/selftest-ai", get(handlers::selftest_ai))
        .route("/refine-mask", post(handlers::refine_mask))
        .route("/api/compose", post(handlers::compose))
        .route("/compose-pdf", post(handlers::compose_pdf))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origin = origin.trim();
    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(e) => {
            tracing::warn!(origin, error = %e, "Invalid CORS origin, allowing any");
            layer.allow_origin(Any)
        },
    }
}

/// Build the engine, bind and serve until Ctrl-C
///
/// # Errors
/// - Engine construction fails (model provisioning, missing backend feature)
/// - The address cannot be bound
pub async fn run_server(config: ServiceConfig) -> Result<()> {
    let addr = config.bind_addr.clone();
    let state = AppState::from_config(config).await?;
    tracing::info!(
        engine = state.orchestrator.engine_name().unwrap_or("none"),
        max_body_bytes = state.config.max_body_bytes(),
        "Application state ready"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "idphoto backend up");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C, serving until killed");
            std::future::pending::<()>().await;
        },
    }
}
