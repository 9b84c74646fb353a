//! Utility modules shared across the pipeline

pub mod color;
#[cfg(any(feature = "onnx", feature = "tract"))]
pub mod preprocessing;

pub use color::ColorParser;
#[cfg(any(feature = "onnx", feature = "tract"))]
pub use preprocessing::ImagePreprocessor;
