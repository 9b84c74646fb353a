//! Axum route handlers

use super::{
    errors::ApiError,
    models::{
        number, side, truthy, AutoAdjustBody, BgRemoveRequest, BgRemoveResponse, ComposeBody,
        ComposePdfRequest, ComposePdfResponse, ComposeResponse, RefineMaskRequest,
        RefineMaskResponse, SheetItemBody,
    },
    state::AppState,
    SERVICE_NAME,
};
use crate::{
    compose::ComposeRequest,
    config::OutputFormat,
    error::{IdPhotoError, Result},
    orchestrator::RemovalOptions,
    refine::{AlphaMaskRefiner, RefineOptions},
    services::ImageCodec,
    sheet::{SheetItem, SheetLayoutEngine, SheetOptions, SheetPreset, DEFAULT_DPI, DEFAULT_MARGIN_MM},
    types::Rgb,
    utils::ColorParser,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{StatusCode, Uri},
    response::IntoResponse,
    Json,
};
use image::{DynamicImage, Rgba, RgbaImage};
use instant::Instant;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinError;
use tracing::instrument;
use uuid::Uuid;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn join_error(e: JoinError) -> ApiError {
    IdPhotoError::internal(format!("Worker task failed: {}", e)).into()
}

fn required_payload(value: Option<&str>) -> Result<Vec<u8>> {
    match value {
        Some(raw) if !raw.trim().is_empty() => ImageCodec::decode_base64(raw),
        _ => Err(IdPhotoError::input("imageBase64 required")),
    }
}

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "ok": true, "service": SERVICE_NAME }))
}

/// GET /healthz
pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true, "service": SERVICE_NAME, "ts": now_ms() }))
}

/// GET /sizes
pub async fn sizes(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "updatedAt": now_ms(), "sizes": state.sizes.as_json() }))
}

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "ok": false, "error": "not_found", "path": uri.path() })),
    )
}

/// AI is tried for a missing quality or `"ai"`; any other value means the heuristic
fn ai_requested(quality: Option<&str>) -> bool {
    match quality {
        Some(quality) => quality.trim().eq_ignore_ascii_case("ai"),
        None => true,
    }
}

fn removal_options(body: &BgRemoveRequest) -> RemovalOptions {
    let allow_ai = ai_requested(body.quality.as_deref());

    match body.final_bg.as_ref().filter(|value| truthy(Some(value), false)) {
        Some(replacement) => RemovalOptions {
            transparent: false,
            strict_replace: true,
            background: ColorParser::parse_or(Some(replacement), Rgb::WHITE),
            allow_ai,
        },
        None => RemovalOptions {
            transparent: truthy(body.transparent_background.as_ref(), false),
            strict_replace: false,
            background: ColorParser::parse_or(body.bg_color.as_ref(), Rgb::WHITE),
            allow_ai,
        },
    }
}

/// POST /bg-remove
///
/// Cut the subject out, AI first. Fails with 503 only when the engine
/// failed and the request (or the transparency policy) rules out a fallback.
#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn bg_remove(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BgRemoveRequest>, JsonRejection>,
) -> std::result::Result<Json<BgRemoveResponse>, ApiError> {
    let started = Instant::now();
    let Json(body) = payload?;
    let input = required_payload(body.image_base64.as_deref())?;
    let options = removal_options(&body);
    let format = body
        .format
        .as_deref()
        .and_then(OutputFormat::parse)
        .unwrap_or(OutputFormat::Png);

    let cutout = state
        .orchestrator
        .remove_encoded(&input, &options, format)
        .await?;

    tracing::info!(mode = %cutout.mode, transparent = cutout.transparent, "bg-remove done");
    Ok(Json(BgRemoveResponse {
        ok: true,
        image_base64: ImageCodec::encode_base64(&cutout.bytes),
        mode: cutout.mode.as_str(),
        transparent: cutout.transparent,
        format: cutout.format.as_str(),
        ms: elapsed_ms(started),
    }))
}

fn refine_payload(raw: &str, options: &RefineOptions) -> Result<(u32, u32, Vec<u8>)> {
    let bytes = ImageCodec::decode_base64(raw)?;
    let image = ImageCodec::decode(&bytes)?;
    let refined = AlphaMaskRefiner::try_refine(&image, options)?;
    let png = ImageCodec::encode_png(refined.image())?;
    Ok((image.width(), image.height(), png))
}

/// POST /refine-mask
///
/// Never fails once a payload is present: anything that goes wrong echoes
/// the input back with `mode = "original_fallback"`.
#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn refine_mask(
    payload: std::result::Result<Json<RefineMaskRequest>, JsonRejection>,
) -> std::result::Result<Json<RefineMaskResponse>, ApiError> {
    let started = Instant::now();
    let Json(body) = payload?;
    let raw = match body.image_base64.as_deref() {
        Some(raw) if !raw.trim().is_empty() => raw.to_string(),
        _ => return Err(IdPhotoError::input("imageBase64 required").into()),
    };
    let options = body.options();

    let outcome = tokio::task::spawn_blocking({
        let raw = raw.clone();
        move || refine_payload(&raw, &options)
    })
    .await
    .map_err(|e| IdPhotoError::internal(e.to_string()))
    .and_then(|result| result);

    let response = match outcome {
        Ok((width, height, png)) => RefineMaskResponse {
            ok: true,
            width,
            height,
            image_base64: ImageCodec::encode_base64(&png),
            mode: "refined",
            ms: elapsed_ms(started),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Mask refinement failed, echoing original");
            let (width, height) = ImageCodec::decode_base64(&raw)
                .and_then(|bytes| ImageCodec::probe_dimensions(&bytes))
                .unwrap_or((0, 0));
            RefineMaskResponse {
                ok: true,
                width,
                height,
                image_base64: raw,
                mode: "original_fallback",
                ms: elapsed_ms(started),
            }
        },
    };
    Ok(Json(response))
}

/// POST /api/compose
#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn compose(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ComposeBody>, JsonRejection>,
) -> std::result::Result<Json<ComposeResponse>, ApiError> {
    let Json(body) = payload?;
    let input = required_payload(body.image_base64.as_deref())?;

    let defaults = ComposeRequest::default();
    let request = ComposeRequest {
        width: side(body.width.as_ref(), defaults.width),
        height: side(body.height.as_ref(), defaults.height),
        background: ColorParser::parse_or(body.bg_color.as_ref(), defaults.background),
        format: match body.format.as_deref() {
            Some(format) if format.trim().eq_ignore_ascii_case("png") => OutputFormat::Png,
            _ => OutputFormat::Jpeg,
        },
        template_key: body.template_key.clone(),
        auto_adjust: body.auto_adjust.as_ref().and_then(AutoAdjustBody::to_spec),
    };

    let composer = state.composer.clone();
    let photo = tokio::task::spawn_blocking(move || composer.compose_bytes(&input, &request))
        .await
        .map_err(join_error)??;

    Ok(Json(ComposeResponse {
        ok: true,
        width: photo.width,
        height: photo.height,
        format: photo.format.as_str(),
        image_base64: ImageCodec::encode_base64(&photo.bytes),
    }))
}

fn sheet_item(entry: &Value) -> Result<Option<SheetItem>> {
    let Ok(body) = SheetItemBody::deserialize(entry) else {
        return Ok(None);
    };
    let Some(raw) = body.image_base64.as_deref().filter(|raw| !raw.trim().is_empty()) else {
        return Ok(None);
    };

    let mut item = SheetItem::new(ImageCodec::decode_base64(raw)?);
    if let (Some(w), Some(h)) = (number(body.px_w.as_ref()), number(body.px_h.as_ref())) {
        item = item.with_px_size(w, h);
    }
    if let (Some(w), Some(h)) = (number(body.mm_w.as_ref()), number(body.mm_h.as_ref())) {
        item = item.with_mm_size(w, h);
    }
    Ok(Some(item))
}

/// POST /compose-pdf
#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn compose_pdf(
    payload: std::result::Result<Json<ComposePdfRequest>, JsonRejection>,
) -> std::result::Result<Json<ComposePdfResponse>, ApiError> {
    let Json(body) = payload?;
    let entries = match &body.items {
        Some(Value::Array(entries)) if !entries.is_empty() => entries,
        _ => return Err(IdPhotoError::input("items array required").into()),
    };

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(item) = sheet_item(entry)? {
            items.push(item);
        }
    }
    if items.is_empty() {
        return Err(IdPhotoError::input("No valid items").into());
    }

    let sheet = body.sheet.as_ref();
    let options = SheetOptions {
        preset: sheet
            .and_then(|s| s.kind.as_deref())
            .map_or(SheetPreset::A4, SheetPreset::parse),
        dpi: sheet.and_then(|s| number(s.dpi.as_ref())).unwrap_or(DEFAULT_DPI),
        margin_mm: body
            .margins
            .as_ref()
            .and_then(|m| number(m.mm.as_ref()))
            .unwrap_or(DEFAULT_MARGIN_MM),
        cut_guides: truthy(body.cut_guides.as_ref(), true),
        fill: truthy(body.fill.as_ref(), true),
    };

    let rendered = tokio::task::spawn_blocking(move || SheetLayoutEngine::render_pdf(&items, &options))
        .await
        .map_err(join_error)??;

    Ok(Json(ComposePdfResponse {
        pdf_base64: ImageCodec::encode_base64(&rendered.bytes),
    }))
}

fn selftest_failure(error: &IdPhotoError) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "ok": false, "error": error.to_string() })),
    )
}

fn flatten_probe() -> Result<usize> {
    let probe = ImageCodec::encode_png(&DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        1,
        1,
        Rgba([0, 0, 0, 0]),
    )))?;
    let decoded = ImageCodec::decode(&probe)?;
    let flat = ImageCodec::flatten(decoded.image(), Rgb::WHITE);
    let jpeg = ImageCodec::encode(&DynamicImage::ImageRgb8(flat), OutputFormat::Jpeg, 90)?;
    Ok(jpeg.len())
}

/// GET /bg-remove/selftest-lite
///
/// Exercises the codec only: decode, flatten, JPEG encode.
pub async fn selftest_lite() -> impl IntoResponse {
    let outcome = tokio::task::spawn_blocking(flatten_probe)
        .await
        .map_err(|e| IdPhotoError::internal(e.to_string()))
        .and_then(|result| result);
    match outcome {
        Ok(bytes) => (StatusCode::OK, Json(json!({ "ok": true, "bytes": bytes }))),
        Err(e) => selftest_failure(&e),
    }
}

/// GET /bg-remove/selftest-ai
pub async fn selftest_ai(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.selftest().await {
        Ok(bytes) => (StatusCode::OK, Json(json!({ "ok": true, "gotBytes": bytes }))),
        Err(e) => {
            tracing::error!(error = %e, "AI self-test failed");
            selftest_failure(&e)
        },
    }
}
