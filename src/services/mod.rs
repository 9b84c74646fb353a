//! Service layer
//!
//! Raster codec and format helpers shared by every pipeline stage.

pub mod codec;
pub mod format;

pub use codec::ImageCodec;
pub use format::OutputFormatHandler;
