//! Configuration types for the ID photo service
//!
//! `ServiceConfig` is built once at startup (defaults, then an optional TOML
//! file, then environment overrides) and shared read-only afterwards.

use crate::{
    error::{IdPhotoError, Result},
    presets::PolicyPreset,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling for request bodies; base64 inflates payloads by a third
const MAX_BODY_MB_CAP: usize = 32;

/// Encoded output formats produced by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG, the only format that can carry an alpha channel
    Png,
    /// JPEG, always opaque
    #[serde(alias = "jpg")]
    Jpeg,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Png
    }
}

impl OutputFormat {
    /// Parse a client-supplied format name (`png`, `jpg`, `jpeg`)
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// Wire name used in JSON responses
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when AI matting fails although transparency was explicitly requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransparentFailurePolicy {
    /// Surface `AiUnavailable` to the caller
    HardFail,
    /// Run the heuristic matting and return an opaque result with `transparent=false`
    OpaqueFallback,
}

impl Default for TransparentFailurePolicy {
    fn default() -> Self {
        Self::HardFail
    }
}

impl std::str::FromStr for TransparentFailurePolicy {
    type Err = IdPhotoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hard_fail" | "hard-fail" | "fail" => Ok(Self::HardFail),
            "opaque_fallback" | "opaque-fallback" | "fallback" => Ok(Self::OpaqueFallback),
            other => Err(IdPhotoError::invalid_config(format!(
                "Unknown transparent failure policy '{}' (expected hard_fail or opaque_fallback)",
                other
            ))),
        }
    }
}

/// Matting engine backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// External process speaking PNG over stdin/stdout
    Subprocess,
    /// Embedded ONNX Runtime inference
    Onnx,
    /// Embedded pure Rust inference
    Tract,
    /// No engine; every request takes the heuristic path
    None,
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::Subprocess
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subprocess => write!(f, "subprocess"),
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = IdPhotoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subprocess" | "rembg" => Ok(Self::Subprocess),
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            "none" | "off" => Ok(Self::None),
            other => Err(IdPhotoError::invalid_config(format!(
                "Unknown matting engine '{}' (expected subprocess, onnx, tract or none)",
                other
            ))),
        }
    }
}

/// Command line of the external matting process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    /// Interpreter or executable to launch
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-u".to_string(), "scripts/rembg_stdin.py".to_string()],
        }
    }
}

/// Process-wide service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Socket address the HTTP server binds to
    pub bind_addr: String,

    /// Request body limit in megabytes (capped at 32)
    pub max_body_mb: usize,

    /// Allowed CORS origin (`*` for any)
    pub cors_origin: String,

    /// Skip the AI engine entirely
    pub disable_ai: bool,

    /// Active matting backend
    pub engine: EngineKind,

    /// Subprocess backend command line
    pub subprocess: SubprocessConfig,

    /// Per-call matting timeout in milliseconds
    pub matting_timeout_ms: u64,

    /// Upper bound on simultaneous matting engine calls
    pub max_concurrent_matting: usize,

    /// Behaviour when AI fails while transparency was requested
    pub transparent_failure_policy: TransparentFailurePolicy,

    /// JPEG quality for composed photos
    pub jpeg_quality: u8,

    /// Largest canvas side accepted outside of policy presets
    pub max_side: u32,

    /// Location of the size catalog served on `/sizes`
    pub sizes_path: PathBuf,

    /// Directory holding the embedded backends' model file (None = platform cache dir)
    pub model_dir: Option<PathBuf>,

    /// Mirrors tried in order when the model file is missing
    pub model_urls: Vec<String>,

    /// Non-overridable policy presets
    pub presets: Vec<PolicyPreset>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_body_mb: 30,
            cors_origin: "*".to_string(),
            disable_ai: false,
            engine: EngineKind::default(),
            subprocess: SubprocessConfig::default(),
            matting_timeout_ms: 120_000,
            max_concurrent_matting: 2,
            transparent_failure_policy: TransparentFailurePolicy::default(),
            jpeg_quality: 92,
            max_side: 3000,
            sizes_path: PathBuf::from("sizes.json"),
            model_dir: None,
            model_urls: crate::models::DEFAULT_MODEL_URLS
                .iter()
                .map(|url| (*url).to_string())
                .collect(),
            presets: vec![PolicyPreset::dv_lottery()],
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use idphoto_backend::config::{ServiceConfig, TransparentFailurePolicy};
    ///
    /// let config = ServiceConfig::builder()
    ///     .max_concurrent_matting(4)
    ///     .transparent_failure_policy(TransparentFailurePolicy::OpaqueFallback)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_concurrent_matting, 4);
    /// ```
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Load a TOML configuration file; absent keys keep their defaults
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IdPhotoError::invalid_config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse a TOML document into a configuration
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| IdPhotoError::invalid_config(format!("Invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// Recognised keys: `PORT`, `MAX_BODY_MB`, `CORS_ORIGIN`, `DISABLE_AI`,
    /// `MATTING_ENGINE`, `REMBG_PY`, `MATTING_TIMEOUT_MS`, `MAX_CONCURRENT_MATTING`,
    /// `TRANSPARENT_FAILURE_POLICY`, `SIZES_PATH`, `U2NETP_URL`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| IdPhotoError::config_value_error("PORT", port.as_str(), "1-65535", None))?;
            let host = self
                .bind_addr
                .rsplit_once(':')
                .map_or("0.0.0.0", |(host, _)| host)
                .to_string();
            self.bind_addr = format!("{}:{}", host, port);
        }
        if let Some(mb) = lookup("MAX_BODY_MB") {
            self.max_body_mb = parse_number("MAX_BODY_MB", &mb)?;
        }
        if let Some(origin) = lookup("CORS_ORIGIN") {
            self.cors_origin = origin;
        }
        if let Some(flag) = lookup("DISABLE_AI") {
            self.disable_ai = flag.trim() == "1" || flag.trim().eq_ignore_ascii_case("true");
        }
        if let Some(engine) = lookup("MATTING_ENGINE") {
            self.engine = engine.parse()?;
        }
        if let Some(program) = lookup("REMBG_PY") {
            if !program.trim().is_empty() {
                self.subprocess.program = program;
            }
        }
        if let Some(ms) = lookup("MATTING_TIMEOUT_MS") {
            self.matting_timeout_ms = parse_number("MATTING_TIMEOUT_MS", &ms)?;
        }
        if let Some(n) = lookup("MAX_CONCURRENT_MATTING") {
            self.max_concurrent_matting = parse_number("MAX_CONCURRENT_MATTING", &n)?;
        }
        if let Some(policy) = lookup("TRANSPARENT_FAILURE_POLICY") {
            self.transparent_failure_policy = policy.parse()?;
        }
        if let Some(path) = lookup("SIZES_PATH") {
            self.sizes_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("U2NETP_URL") {
            if !url.trim().is_empty() && !self.model_urls.contains(&url) {
                self.model_urls.insert(0, url);
            }
        }
        self.validate()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `max_concurrent_matting` or `matting_timeout_ms` is zero
    /// - JPEG quality outside 1-100
    /// - `max_side` is zero
    /// - a preset with an empty key or an inverted side range
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_matting == 0 {
            return Err(IdPhotoError::config_value_error(
                "max_concurrent_matting",
                0,
                ">= 1",
                Some(2),
            ));
        }
        if self.matting_timeout_ms == 0 {
            return Err(IdPhotoError::config_value_error(
                "matting_timeout_ms",
                0,
                ">= 1",
                Some(120_000),
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(IdPhotoError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
                Some(92),
            ));
        }
        if self.max_side == 0 {
            return Err(IdPhotoError::config_value_error("max_side", 0, ">= 1", Some(3000)));
        }
        for preset in &self.presets {
            preset.validate()?;
        }
        Ok(())
    }

    /// Matting call timeout
    #[must_use]
    pub fn matting_timeout(&self) -> Duration {
        Duration::from_millis(self.matting_timeout_ms)
    }

    /// Request body limit in bytes
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.clamp(1, MAX_BODY_MB_CAP) * 1024 * 1024
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IdPhotoError::invalid_config(format!("{} must be a number, got '{}'", key, value)))
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Set the bind address
    #[must_use]
    pub fn bind_addr<S: Into<String>>(mut self, addr: S) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// Disable or enable the AI engine
    #[must_use]
    pub fn disable_ai(mut self, disable: bool) -> Self {
        self.config.disable_ai = disable;
        self
    }

    /// Select the matting backend
    #[must_use]
    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.config.engine = engine;
        self
    }

    /// Set the subprocess command line
    #[must_use]
    pub fn subprocess(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.config.subprocess = SubprocessConfig {
            program: program.into(),
            args,
        };
        self
    }

    /// Set the matting timeout in milliseconds
    #[must_use]
    pub fn matting_timeout_ms(mut self, ms: u64) -> Self {
        self.config.matting_timeout_ms = ms;
        self
    }

    /// Set the concurrency limit for matting calls
    #[must_use]
    pub fn max_concurrent_matting(mut self, permits: usize) -> Self {
        self.config.max_concurrent_matting = permits;
        self
    }

    /// Set the transparent-failure policy
    #[must_use]
    pub fn transparent_failure_policy(mut self, policy: TransparentFailurePolicy) -> Self {
        self.config.transparent_failure_policy = policy;
        self
    }

    /// Set JPEG quality
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.min(100);
        self
    }

    /// Set the non-preset canvas side cap
    #[must_use]
    pub fn max_side(mut self, side: u32) -> Self {
        self.config.max_side = side;
        self
    }

    /// Set the size catalog path
    #[must_use]
    pub fn sizes_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.sizes_path = path.into();
        self
    }

    /// Set the model directory
    #[must_use]
    pub fn model_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.model_dir = Some(path.into());
        self
    }

    /// Replace the preset table
    #[must_use]
    pub fn presets(mut self, presets: Vec<PolicyPreset>) -> Self {
        self.config.presets = presets;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transparent_failure_policy, TransparentFailurePolicy::HardFail);
        assert_eq!(config.matting_timeout(), Duration::from_secs(120));
        assert_eq!(config.max_body_bytes(), 30 * 1024 * 1024);
        assert_eq!(config.presets.len(), 1);
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("png"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::parse("JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse("jpeg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse("gif"), None);
        assert_eq!(OutputFormat::Jpeg.as_str(), "jpg");
    }

    #[test]
    fn test_builder_validation() {
        assert!(ServiceConfig::builder().max_concurrent_matting(0).build().is_err());
        assert!(ServiceConfig::builder().matting_timeout_ms(0).build().is_err());
        assert!(ServiceConfig::builder().jpeg_quality(0).build().is_err());

        // Quality is clamped by the builder
        let config = ServiceConfig::builder().jpeg_quality(150).build().unwrap();
        assert_eq!(config.jpeg_quality, 100);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "9090"),
            ("DISABLE_AI", "1"),
            ("MAX_BODY_MB", "64"),
            ("MATTING_ENGINE", "none"),
            ("TRANSPARENT_FAILURE_POLICY", "opaque_fallback"),
            ("REMBG_PY", "/opt/venv/bin/python3.12"),
            ("U2NETP_URL", "https://mirror.example/u2netp.onnx"),
        ]
        .into_iter()
        .collect();

        let mut config = ServiceConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9090");
        assert!(config.disable_ai);
        assert_eq!(config.engine, EngineKind::None);
        assert_eq!(
            config.transparent_failure_policy,
            TransparentFailurePolicy::OpaqueFallback
        );
        assert_eq!(config.subprocess.program, "/opt/venv/bin/python3.12");
        assert_eq!(config.model_urls[0], "https://mirror.example/u2netp.onnx");
        // Body limit is capped even when configured higher
        assert_eq!(config.max_body_bytes(), 32 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = ServiceConfig::default();
        let result = config.apply_overrides(|key| (key == "PORT").then(|| "not-a-port".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = ServiceConfig::from_toml_str(
            r#"
            bind_addr = "127.0.0.1:3000"
            max_concurrent_matting = 8
            transparent_failure_policy = "opaque_fallback"
            engine = "tract"

            [subprocess]
            program = "/usr/bin/python3"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.max_concurrent_matting, 8);
        assert_eq!(config.engine, EngineKind::Tract);
        assert_eq!(config.subprocess.program, "/usr/bin/python3");
        // Untouched keys keep defaults
        assert_eq!(config.subprocess.args.len(), 2);
        assert_eq!(config.jpeg_quality, 92);
    }

    #[test]
    fn test_from_toml_rejects_invalid_values() {
        assert!(ServiceConfig::from_toml_str("max_concurrent_matting = 0").is_err());
        assert!(ServiceConfig::from_toml_str("engine = \"gpu\"").is_err());
    }
}
