//! Wire types for the HTTP API
//!
//! Request fields that clients send loosely typed (numbers as strings, colors
//! as strings or arrays) are kept as raw JSON values and interpreted with the
//! helpers at the bottom of this module.

use crate::{
    compose::{AutoAdjustSpec, HeadBox, PctRange},
    refine::RefineOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /bg-remove`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BgRemoveRequest {
    #[serde(rename = "imageBase64")]
    pub image_base64: Option<String>,
    /// `"png"` (default) or `"jpg"`
    pub format: Option<String>,
    /// `"ai"` (default) or `"fast"`
    pub quality: Option<String>,
    #[serde(rename = "bgColor")]
    pub bg_color: Option<Value>,
    pub transparent_background: Option<Value>,
    /// Explicit replacement background; demands a genuine AI cutout
    pub final_bg: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct BgRemoveResponse {
    pub ok: bool,
    #[serde(rename = "imageBase64")]
    pub image_base64: String,
    pub mode: &'static str,
    pub transparent: bool,
    pub format: &'static str,
    pub ms: u64,
}

/// `POST /refine-mask`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefineMaskRequest {
    #[serde(rename = "imageBase64")]
    pub image_base64: Option<String>,
    pub strength: Option<Value>,
    pub threshold: Option<Value>,
    pub feather: Option<Value>,
}

impl RefineMaskRequest {
    /// Refinement options with defaults for absent or non-numeric fields
    #[must_use]
    pub fn options(&self) -> RefineOptions {
        let defaults = RefineOptions::default();
        RefineOptions {
            strength: number(self.strength.as_ref()).map_or(defaults.strength, |v| v as f32),
            threshold: number(self.threshold.as_ref()).map_or(defaults.threshold, |v| v as f32),
            feather_sigma: number(self.feather.as_ref())
                .map_or(defaults.feather_sigma, |v| v as f32),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefineMaskResponse {
    pub ok: bool,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "imageBase64")]
    pub image_base64: String,
    /// `"refined"` or `"original_fallback"`
    pub mode: &'static str,
    pub ms: u64,
}

/// `POST /api/compose`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ComposeBody {
    #[serde(rename = "templateKey")]
    pub template_key: Option<String>,
    #[serde(rename = "imageBase64")]
    pub image_base64: Option<String>,
    pub width: Option<Value>,
    pub height: Option<Value>,
    #[serde(rename = "bgColor")]
    pub bg_color: Option<Value>,
    pub format: Option<String>,
    #[serde(rename = "autoAdjust")]
    pub auto_adjust: Option<AutoAdjustBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AutoAdjustBody {
    #[serde(rename = "headBox")]
    pub head_box: Option<HeadBoxBody>,
    pub rules: Option<RulesBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HeadBoxBody {
    pub top: Option<Value>,
    pub bottom: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RulesBody {
    pub head_pct: Option<RangeBody>,
    pub eyes_from_bottom_pct: Option<RangeBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RangeBody {
    pub min: Option<Value>,
    pub max: Option<Value>,
}

impl RangeBody {
    /// Bounds that do not read as numbers keep their default
    fn or(range: Option<&Self>, default: PctRange) -> PctRange {
        let min = range.and_then(|r| number(r.min.as_ref())).unwrap_or(default.min);
        let max = range.and_then(|r| number(r.max.as_ref())).unwrap_or(default.max);
        PctRange::new(min, max)
    }
}

impl AutoAdjustBody {
    /// Hints are only used when the head box has numeric top and bottom
    #[must_use]
    pub fn to_spec(&self) -> Option<AutoAdjustSpec> {
        let head_box = self.head_box.as_ref()?;
        let top = strict_number(head_box.top.as_ref())?;
        let bottom = strict_number(head_box.bottom.as_ref())?;
        let rules = self.rules.as_ref();
        Some(AutoAdjustSpec {
            head_box: HeadBox { top, bottom },
            head_pct: RangeBody::or(
                rules.and_then(|r| r.head_pct.as_ref()),
                AutoAdjustSpec::DEFAULT_HEAD_PCT,
            ),
            eyes_from_bottom_pct: RangeBody::or(
                rules.and_then(|r| r.eyes_from_bottom_pct.as_ref()),
                AutoAdjustSpec::DEFAULT_EYES_FROM_BOTTOM_PCT,
            ),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ComposeResponse {
    pub ok: bool,
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
    #[serde(rename = "imageBase64")]
    pub image_base64: String,
}

/// `POST /compose-pdf`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ComposePdfRequest {
    pub items: Option<Value>,
    pub sheet: Option<SheetBody>,
    pub margins: Option<MarginsBody>,
    #[serde(rename = "cutGuides")]
    pub cut_guides: Option<Value>,
    pub fill: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SheetBody {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub dpi: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MarginsBody {
    pub mm: Option<Value>,
}

/// One entry of `items`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SheetItemBody {
    #[serde(rename = "imageBase64")]
    pub image_base64: Option<String>,
    #[serde(rename = "pxW")]
    pub px_w: Option<Value>,
    #[serde(rename = "pxH")]
    pub px_h: Option<Value>,
    #[serde(rename = "mmW")]
    pub mm_w: Option<Value>,
    #[serde(rename = "mmH")]
    pub mm_h: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ComposePdfResponse {
    #[serde(rename = "pdfBase64")]
    pub pdf_base64: String,
}

/// Lenient numeric read: JSON numbers and numeric strings
#[must_use]
pub fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Numeric read that only accepts JSON numbers
#[must_use]
pub fn strict_number(value: Option<&Value>) -> Option<f64> {
    value?.as_f64().filter(|v| v.is_finite())
}

/// Positive integer side, rounded; anything else yields `default`
#[must_use]
pub fn side(value: Option<&Value>, default: u32) -> u32 {
    match number(value) {
        Some(v) if v > 0.0 => (v.round().min(f64::from(u32::MAX)) as u32).max(1),
        _ => default,
    }
}

/// Truthiness with a default for absent/null values
#[must_use]
pub fn truthy(value: Option<&Value>, default: bool) -> bool {
    match value {
        None | Some(Value::Null) => default,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}
