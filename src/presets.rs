//! Policy presets and the size catalog
//!
//! Both are loaded once at startup and shared read-only afterwards.

use crate::{
    config::OutputFormat,
    error::{IdPhotoError, Result},
    types::Rgb,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Key of the built-in diversity-visa lottery preset
pub const DV_LOTTERY_KEY: &str = "us:dv-lottery";

/// Named, non-overridable size/background/format constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyPreset {
    /// Template key clients send (matched case-insensitively)
    pub key: String,
    /// Smallest allowed square side in pixels
    pub min_side: u32,
    /// Largest allowed square side in pixels
    pub max_side: u32,
    /// Forced background color
    #[serde(default)]
    pub background: Rgb,
    /// Forced output format
    #[serde(default = "jpeg")]
    pub format: OutputFormat,
}

fn jpeg() -> OutputFormat {
    OutputFormat::Jpeg
}

impl PolicyPreset {
    /// US diversity-visa lottery: square 600-1200 px, white, JPEG
    #[must_use]
    pub fn dv_lottery() -> Self {
        Self {
            key: DV_LOTTERY_KEY.to_string(),
            min_side: 600,
            max_side: 1200,
            background: Rgb::WHITE,
            format: OutputFormat::Jpeg,
        }
    }

    /// Check that the preset is usable
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(IdPhotoError::invalid_config("Preset key cannot be empty"));
        }
        if self.min_side == 0 || self.min_side > self.max_side {
            return Err(IdPhotoError::invalid_config(format!(
                "Preset '{}' has an invalid side range {}-{}",
                self.key, self.min_side, self.max_side
            )));
        }
        Ok(())
    }

    /// Square canvas side for a requested size; the width wins when present
    #[must_use]
    pub fn resolve_side(&self, width: u32, height: u32) -> u32 {
        let requested = if width > 0 { width } else { height };
        let requested = if requested > 0 { requested } else { self.min_side };
        requested.clamp(self.min_side, self.max_side)
    }

    /// Whether `key` names this preset
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key.trim())
    }
}

/// Read-only lookup over the configured presets
#[derive(Debug, Clone, Default)]
pub struct PresetTable {
    presets: Vec<PolicyPreset>,
}

impl PresetTable {
    #[must_use]
    pub fn new(presets: Vec<PolicyPreset>) -> Self {
        Self { presets }
    }

    /// Find the preset for a template key
    #[must_use]
    pub fn lookup(&self, key: Option<&str>) -> Option<&PolicyPreset> {
        let key = key?.trim();
        if key.is_empty() {
            return None;
        }
        self.presets.iter().find(|preset| preset.matches(key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

/// Static photo-size catalog served verbatim on `/sizes`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SizeCatalog {
    sizes: serde_json::Value,
}

impl SizeCatalog {
    /// Wrap an already-parsed catalog
    #[must_use]
    pub fn new(sizes: serde_json::Value) -> Self {
        Self { sizes }
    }

    /// Load the catalog; unreadable or invalid files yield an empty object
    #[must_use]
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(catalog) => {
                tracing::info!(path = %path.display(), "Loaded size catalog");
                catalog
            },
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load size catalog");
                Self::empty()
            },
        }
    }

    /// Load the catalog, reporting failures
    pub fn try_load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let sizes = serde_json::from_str(&raw).map_err(|e| {
            IdPhotoError::invalid_config(format!("Invalid size catalog {}: {}", path.display(), e))
        })?;
        Ok(Self { sizes })
    }

    /// `{}`
    #[must_use]
    pub fn empty() -> Self {
        Self {
            sizes: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    #[must_use]
    pub fn as_json(&self) -> &serde_json::Value {
        &self.sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_dv_preset_side_clamp() {
        let dv = PolicyPreset::dv_lottery();
        assert!(dv.validate().is_ok());
        assert_eq!(dv.resolve_side(300, 300), 600);
        assert_eq!(dv.resolve_side(900, 400), 900);
        assert_eq!(dv.resolve_side(5000, 5000), 1200);
        assert_eq!(dv.resolve_side(0, 700), 700);
        assert_eq!(dv.resolve_side(0, 0), 600);
    }

    #[test]
    fn test_preset_validation() {
        let mut preset = PolicyPreset::dv_lottery();
        preset.min_side = 2000;
        assert!(preset.validate().is_err());

        preset = PolicyPreset::dv_lottery();
        preset.key = "  ".to_string();
        assert!(preset.validate().is_err());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = PresetTable::new(vec![PolicyPreset::dv_lottery()]);
        assert!(table.lookup(Some("US:DV-Lottery")).is_some());
        assert!(table.lookup(Some(" us:dv-lottery ")).is_some());
        assert!(table.lookup(Some("uk:passport")).is_none());
        assert!(table.lookup(Some("")).is_none());
        assert!(table.lookup(None).is_none());
    }

    #[test]
    fn test_preset_from_toml_defaults() {
        let preset: PolicyPreset =
            toml::from_str("key = \"in:visa\"\nmin_side = 350\nmax_side = 1000\n").unwrap();
        assert_eq!(preset.background, Rgb::WHITE);
        assert_eq!(preset.format, OutputFormat::Jpeg);
    }

    #[test]
    fn test_catalog_load() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"us\": {{\"passport\": [600, 600]}}}}").unwrap();
        let catalog = SizeCatalog::load(file.path());
        assert_eq!(catalog.as_json(), &json!({"us": {"passport": [600, 600]}}));
    }

    #[test]
    fn test_catalog_missing_or_invalid_is_empty() {
        let catalog = SizeCatalog::load("/nonexistent/sizes.json");
        assert_eq!(catalog.as_json(), &json!({}));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert_eq!(SizeCatalog::load(file.path()), SizeCatalog::empty());
    }
}
