//! ID photo backend command line
//!
//! `serve` runs the HTTP service; the other subcommands run the same
//! pipeline stages offline on files.

use super::config::CliConfigBuilder;
use crate::{
    backends::EngineFactory,
    compose::{AutoAdjustSpec, ComposeEngine, ComposeRequest, HeadBox},
    config::{OutputFormat, ServiceConfig},
    models::ModelStore,
    orchestrator::{RemovalOptions, RemovalOrchestrator},
    refine::{AlphaMaskRefiner, RefineOptions},
    server,
    services::{ImageCodec, OutputFormatHandler},
    sheet::{SheetItem, SheetLayoutEngine, SheetOptions, SheetPreset},
    tracing_config::{TracingConfig, TracingFormat},
    utils::ColorParser,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use instant::Instant;
use std::path::{Path, PathBuf};
use tracing::info;

/// ID/passport photo backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "idphoto-backend")]
pub struct Cli {
    /// TOML configuration file (environment variables are applied on top)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log level or filter directive; overrides -v and LOG_LEVEL
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service
    Serve {
        /// Socket address to bind, e.g. 127.0.0.1:8080
        #[arg(long)]
        bind: Option<String>,

        /// Matting backend (subprocess, onnx, tract, none)
        #[arg(long)]
        engine: Option<String>,

        /// Skip AI matting entirely
        #[arg(long)]
        disable_ai: bool,
    },

    /// Remove the background of an image file
    Remove {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the alpha channel (output is always PNG)
        #[arg(long)]
        transparent: bool,

        /// Skip the AI engine and use the heuristic only
        #[arg(long)]
        fast: bool,

        /// Background color for opaque output
        #[arg(long, default_value = "#ffffff")]
        bg: String,

        /// Replacement background; fails instead of falling back when AI is unavailable
        #[arg(long)]
        final_bg: Option<String>,

        #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Png)]
        format: CliOutputFormat,
    },

    /// Clean up the alpha matte of a cutout
    Refine {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Denoise strength (0-1)
        #[arg(long, default_value_t = 0.6)]
        strength: f32,

        /// Binary threshold (0-255)
        #[arg(long, default_value_t = 180.0)]
        threshold: f32,

        /// Edge feather sigma
        #[arg(long, default_value_t = 0.8)]
        feather: f32,
    },

    /// Place a cutout on a photo canvas
    Compose {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = 600)]
        width: u32,

        #[arg(long, default_value_t = 600)]
        height: u32,

        #[arg(long, default_value = "#ffffff")]
        bg: String,

        #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Jpeg)]
        format: CliOutputFormat,

        /// Policy preset key, e.g. us:dv-lottery
        #[arg(long)]
        template: Option<String>,

        /// Head box top in canvas pixels (enables auto-adjust)
        #[arg(long, requires = "head_bottom")]
        head_top: Option<f64>,

        /// Head box bottom in canvas pixels
        #[arg(long, requires = "head_top")]
        head_bottom: Option<f64>,
    },

    /// Lay out finished photos on a printable PDF sheet
    Sheet {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        /// Page size: A4, Letter or 4x6
        #[arg(long, default_value = "A4")]
        sheet: String,

        #[arg(long, default_value_t = 300.0)]
        dpi: f64,

        #[arg(long, default_value_t = 5.0)]
        margin_mm: f64,

        /// Physical photo width in millimeters (with --mm-height)
        #[arg(long, requires = "mm_height")]
        mm_width: Option<f64>,

        #[arg(long, requires = "mm_width")]
        mm_height: Option<f64>,

        /// Do not draw the cut guide
        #[arg(long)]
        no_cut_guides: bool,

        /// Do not repeat a single photo across the page
        #[arg(long)]
        no_fill: bool,
    },

    /// Download the matting model used by the embedded backends
    FetchModel {
        /// Target directory (defaults to the configured model directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => Self::Png,
            CliOutputFormat::Jpeg => Self::Jpeg,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    /// Requires the `tracing-json` feature; compact output otherwise
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Console => Self::Console,
            CliLogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Self::Json,
            #[cfg(not(feature = "tracing-json"))]
            CliLogFormat::Json => Self::Compact,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    match &cli.command {
        Command::Serve { .. } => server::run_server(config)
            .await
            .context("HTTP server failed"),
        Command::Remove {
            input,
            output,
            transparent,
            fast,
            bg,
            final_bg,
            format,
        } => {
            let options = removal_options(*transparent, *fast, bg, final_bg.as_deref())?;
            remove_file(&config, input, output.as_deref(), &options, (*format).into()).await
        },
        Command::Refine {
            input,
            output,
            strength,
            threshold,
            feather,
        } => {
            let options = RefineOptions {
                strength: *strength,
                threshold: *threshold,
                feather_sigma: *feather,
            };
            refine_file(input, output.as_deref(), &options)
        },
        Command::Compose {
            input,
            output,
            width,
            height,
            bg,
            format,
            template,
            head_top,
            head_bottom,
        } => {
            let request = ComposeRequest {
                width: *width,
                height: *height,
                background: ColorParser::parse_str(bg)
                    .with_context(|| format!("Invalid background color '{}'", bg))?,
                format: (*format).into(),
                template_key: template.clone(),
                auto_adjust: head_top.zip(*head_bottom).map(|(top, bottom)| {
                    AutoAdjustSpec::new(HeadBox { top, bottom })
                }),
            };
            compose_file(&config, input, output.as_deref(), &request)
        },
        Command::Sheet {
            inputs,
            output,
            sheet,
            dpi,
            margin_mm,
            mm_width,
            mm_height,
            no_cut_guides,
            no_fill,
        } => {
            let options = SheetOptions {
                preset: SheetPreset::parse(sheet),
                dpi: *dpi,
                margin_mm: *margin_mm,
                cut_guides: !*no_cut_guides,
                fill: !*no_fill,
            };
            sheet_file(inputs, output, &options, mm_width.zip(*mm_height))
        },
        Command::FetchModel { dir } => fetch_model(&config, dir.clone()).await,
    }
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let env_level = std::env::var("LOG_LEVEL").ok();
    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.log_format.into())
        .with_level_name(cli.log_level.as_deref().or(env_level.as_deref()))
        .with_instance_id(uuid::Uuid::new_v4().to_string())
        .init()
}

fn removal_options(
    transparent: bool,
    fast: bool,
    bg: &str,
    final_bg: Option<&str>,
) -> Result<RemovalOptions> {
    let parse = |value: &str| {
        ColorParser::parse_str(value).with_context(|| format!("Invalid color '{}'", value))
    };
    Ok(match final_bg {
        Some(replacement) => RemovalOptions {
            transparent: false,
            strict_replace: true,
            background: parse(replacement)?,
            allow_ai: !fast,
        },
        None => RemovalOptions {
            transparent,
            strict_replace: false,
            background: parse(bg)?,
            allow_ai: !fast,
        },
    })
}

/// `<stem>-<suffix>.<ext>` next to the input
fn default_output(input: &Path, suffix: &str, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "output".into(), |stem| stem.to_string_lossy());
    input.with_file_name(format!(
        "{}-{}.{}",
        stem,
        suffix,
        OutputFormatHandler::extension(format)
    ))
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), "Wrote output");
    Ok(())
}

async fn remove_file(
    config: &ServiceConfig,
    input: &Path,
    output: Option<&Path>,
    options: &RemovalOptions,
    format: OutputFormat,
) -> Result<()> {
    let start = Instant::now();
    let bytes = read_input(input)?;
    let engine = EngineFactory::create(config)
        .await
        .context("Failed to create matting engine")?;
    let orchestrator = RemovalOrchestrator::new(engine, config);

    let cutout = orchestrator
        .remove_encoded(&bytes, options, format)
        .await
        .with_context(|| format!("Background removal failed for {}", input.display()))?;

    let output = output.map_or_else(|| default_output(input, "cutout", cutout.format), Path::to_path_buf);
    write_output(&output, &cutout.bytes)?;
    println!(
        "{} -> {} (mode: {}, transparent: {}, {} ms)",
        input.display(),
        output.display(),
        cutout.mode,
        cutout.transparent,
        start.elapsed().as_millis()
    );
    Ok(())
}

fn refine_file(input: &Path, output: Option<&Path>, options: &RefineOptions) -> Result<()> {
    let image = ImageCodec::decode(&read_input(input)?)
        .with_context(|| format!("Failed to decode {}", input.display()))?;
    let refined = AlphaMaskRefiner::refine(&image, options);
    let png = ImageCodec::encode_png(refined.image()).context("Failed to encode refined image")?;

    let output = output.map_or_else(|| default_output(input, "refined", OutputFormat::Png), Path::to_path_buf);
    write_output(&output, &png)
}

fn compose_file(
    config: &ServiceConfig,
    input: &Path,
    output: Option<&Path>,
    request: &ComposeRequest,
) -> Result<()> {
    let engine = ComposeEngine::from_config(config);
    let photo = engine
        .compose_bytes(&read_input(input)?, request)
        .with_context(|| format!("Composition failed for {}", input.display()))?;

    let output = output.map_or_else(|| default_output(input, "photo", photo.format), Path::to_path_buf);
    write_output(&output, &photo.bytes)?;
    println!(
        "{} -> {} ({}x{} {}, scale {:.3})",
        input.display(),
        output.display(),
        photo.width,
        photo.height,
        photo.format,
        photo.placement.scale
    );
    Ok(())
}

fn sheet_file(
    inputs: &[PathBuf],
    output: &Path,
    options: &SheetOptions,
    mm_size: Option<(f64, f64)>,
) -> Result<()> {
    let items = inputs
        .iter()
        .map(|path| {
            let item = SheetItem::new(read_input(path)?);
            Ok(match mm_size {
                Some((w, h)) => item.with_mm_size(w, h),
                None => item,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let sheet = SheetLayoutEngine::render_pdf(&items, options).context("Failed to render sheet")?;
    write_output(output, &sheet.bytes)?;
    println!(
        "{} photo(s) placed on {} sheet -> {}",
        sheet.layout.placements.len(),
        options.preset.as_str(),
        output.display()
    );
    Ok(())
}

async fn fetch_model(config: &ServiceConfig, dir: Option<PathBuf>) -> Result<()> {
    let store = ModelStore::new(dir.or_else(|| config.model_dir.clone()), config.model_urls.clone())
        .context("Failed to resolve model directory")?;
    let path = store.ensure_model().await.context("Failed to fetch model")?;
    println!("Model ready at {}", path.display());
    Ok(())
}
