#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

//! # ID Photo Backend
//!
//! Background removal, mask refinement, canvas composition and print sheet
//! layout for ID and passport photos, served over a small JSON HTTP API.
//!
//! ## Pipeline
//!
//! - **Removal**: [`RemovalOrchestrator`] runs a pluggable [`MattingEngine`]
//!   under a concurrency limit and timeout, and falls back to the
//!   [`HeuristicMatting`] when AI matting is unavailable or disallowed
//! - **Refinement**: [`AlphaMaskRefiner`] denoises, thresholds and feathers the alpha matte
//! - **Composition**: [`ComposeEngine`] scales and centres a cutout on a
//!   photo canvas, optionally aligning the head with a policy preset
//! - **Sheets**: [`SheetLayoutEngine`] tiles finished photos onto an
//!   A4, Letter or 4x6 PDF page
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idphoto_backend::{
//!     backends::EngineFactory, RemovalOptions, RemovalOrchestrator, ServiceConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::default();
//! let engine = EngineFactory::create(&config).await?;
//! let orchestrator = RemovalOrchestrator::new(engine, &config);
//!
//! let input = std::fs::read("portrait.jpg")?;
//! let options = RemovalOptions {
//!     transparent: true,
//!     ..RemovalOptions::default()
//! };
//! let cutout = orchestrator
//!     .remove_encoded(&input, &options, idphoto_backend::OutputFormat::Png)
//!     .await?;
//! std::fs::write("cutout.png", &cutout.bytes)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): command line binary and tracing subscriber setup
//! - `onnx`: embedded ONNX Runtime matting engine
//! - `tract`: embedded pure Rust matting engine
//! - `tracing-json`: JSON log output
//! - `webp-support` (default): WebP input decoding

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compose;
pub mod config;
pub mod error;
pub mod heuristic;
pub mod inference;
pub mod models;
pub mod orchestrator;
pub mod presets;
pub mod refine;
pub mod server;
pub mod services;
pub mod sheet;
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use backends::{EngineFactory, MockEngine, SubprocessEngine};
pub use compose::{AutoAdjustSpec, ComposeEngine, ComposeRequest, ComposedPhoto, HeadBox};
pub use config::{EngineKind, OutputFormat, ServiceConfig, TransparentFailurePolicy};
pub use error::{IdPhotoError, Result};
pub use heuristic::HeuristicMatting;
pub use inference::{MattingEngine, SharedEngine};
pub use models::ModelStore;
pub use orchestrator::{RemovalOptions, RemovalOrchestrator};
pub use presets::{PolicyPreset, PresetTable, SizeCatalog};
pub use refine::{AlphaMaskRefiner, RefineOptions};
pub use server::{build_router, run_server, AppState};
pub use services::{ImageCodec, OutputFormatHandler};
pub use sheet::{SheetItem, SheetLayoutEngine, SheetOptions, SheetPreset};
pub use tracing_config::{TracingConfig, TracingFormat};
pub use types::{CutoutResult, EncodedCutout, Mask, RasterImage, RemovalMode, Rgb};
pub use utils::ColorParser;

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
