//! Color parsing and conversion utilities

use crate::{
    error::{IdPhotoError, Result},
    types::Rgb,
};
use serde_json::Value;

/// Utility for parsing client-supplied colors
pub struct ColorParser;

impl ColorParser {
    /// Parse a hex color string
    ///
    /// Supports both #RRGGBB and #RGB formats.
    ///
    /// # Examples
    /// ```rust
    /// use idphoto_backend::{utils::ColorParser, Rgb};
    ///
    /// assert_eq!(ColorParser::parse_hex("#ffffff").unwrap(), Rgb::WHITE);
    /// assert_eq!(ColorParser::parse_hex("#f00").unwrap(), Rgb::new(255, 0, 0));
    /// assert_eq!(ColorParser::parse_hex("0000ff").unwrap(), Rgb::new(0, 0, 255));
    /// ```
    pub fn parse_hex(hex: &str) -> Result<Rgb> {
        let hex = hex.trim().trim_start_matches('#');
        let component = |range: std::ops::Range<usize>, name: &str| -> Result<u8> {
            hex.get(range)
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| IdPhotoError::input(format!("Invalid {} component in hex color", name)))
        };

        match hex.len() {
            6 => Ok(Rgb::new(
                component(0..2, "red")?,
                component(2..4, "green")?,
                component(4..6, "blue")?,
            )),
            // #RGB expands each digit, e.g. f -> ff
            3 => Ok(Rgb::new(
                component(0..1, "red")? * 17,
                component(1..2, "green")? * 17,
                component(2..3, "blue")? * 17,
            )),
            _ => Err(IdPhotoError::input("Color must be in #RRGGBB or #RGB format")),
        }
    }

    /// Parse a hex string or one of a few CSS color names
    pub fn parse_str(value: &str) -> Result<Rgb> {
        match value.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(Rgb::WHITE),
            "black" => Ok(Rgb::new(0, 0, 0)),
            "red" => Ok(Rgb::new(255, 0, 0)),
            "blue" => Ok(Rgb::new(0, 0, 255)),
            "gray" | "grey" => Ok(Rgb::new(128, 128, 128)),
            "lightgray" | "lightgrey" => Ok(Rgb::new(211, 211, 211)),
            other => Self::parse_hex(other),
        }
    }

    /// Parse a JSON color: a string, or an `[r, g, b]` array whose entries are clamped to 0-255
    pub fn parse_value(value: &Value) -> Result<Rgb> {
        match value {
            Value::String(s) => Self::parse_str(s),
            Value::Array(items) if items.len() == 3 => {
                let channel = |v: &Value| v.as_f64().unwrap_or(0.0).round().clamp(0.0, 255.0) as u8;
                Ok(Rgb::new(channel(&items[0]), channel(&items[1]), channel(&items[2])))
            },
            other => Err(IdPhotoError::input(format!("Unsupported color value: {}", other))),
        }
    }

    /// Parse an optional JSON color, falling back to `default` when absent or invalid
    #[must_use]
    pub fn parse_or(value: Option<&Value>, default: Rgb) -> Rgb {
        match value {
            None | Some(Value::Null) => default,
            Some(v) => Self::parse_value(v).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring unparseable color, using default");
                default
            }),
        }
    }

    /// Convert a color to a `#rrggbb` string
    #[must_use]
    pub fn to_hex(color: Rgb) -> String {
        format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b)
    }
}
