//! Error types for ID photo processing operations

use thiserror::Error;

/// Result type alias for ID photo operations
pub type Result<T> = std::result::Result<T, IdPhotoError>;

/// Error taxonomy shared by every pipeline stage
#[derive(Error, Debug)]
pub enum IdPhotoError {
    /// Missing or unparseable base64 payload, undecodable image
    #[error("Invalid input: {0}")]
    Input(String),

    /// The matting engine failed, timed out or returned garbage
    #[error("AI matting unavailable: {0}")]
    AiUnavailable(String),

    /// Canvas or item dimensions could not be determined
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Failure after a cutout was produced but before the bytes were ready
    #[error("Encode error: {0}")]
    Encode(String),

    /// Image format or processing errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model provisioning or loading errors
    #[error("Model error: {0}")]
    Model(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdPhotoError {
    /// Create a new input error
    pub fn input<S: Into<String>>(msg: S) -> Self {
        Self::Input(msg.into())
    }

    /// Create a new AI unavailable error
    pub fn ai_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::AiUnavailable(msg.into())
    }

    /// Create a new geometry error
    pub fn geometry<S: Into<String>>(msg: S) -> Self {
        Self::Geometry(msg.into())
    }

    /// Create a new encode error
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller is at fault (maps to a client-error status)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Input(_) | Self::Geometry(_))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create matting error with engine context
    pub fn engine_failure(engine: &str, error: &str) -> Self {
        Self::AiUnavailable(format!("{} engine failed: {}", engine, error))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Internal(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }
}
