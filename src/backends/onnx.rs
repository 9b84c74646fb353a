//! ONNX Runtime matting backend
//!
//! Runs the U²-Net-p graph in-process. Inference is CPU-bound, so every call
//! moves to the blocking pool; the session is shared behind a mutex because
//! `Session::run` needs exclusive access.

use crate::{
    error::{IdPhotoError, Result},
    inference::MattingEngine,
    models::PreprocessingConfig,
    utils::ImagePreprocessor,
};
use async_trait::async_trait;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Matting engine backed by ONNX Runtime
#[derive(Debug, Clone)]
pub struct OnnxEngine {
    session: Arc<Mutex<Session>>,
    preprocessing: PreprocessingConfig,
}

impl OnnxEngine {
    /// Load the model and build a CPU session
    ///
    /// # Errors
    /// - The model file cannot be read or is not a valid ONNX graph
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let start = instant::Instant::now();
        let intra_threads = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);

        let session = Session::builder()
            .map_err(|e| IdPhotoError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| IdPhotoError::model(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(intra_threads)
            .map_err(|e| IdPhotoError::model(format!("Failed to set intra threads: {e}")))?
            .commit_from_file(path)
            .map_err(|e| {
                IdPhotoError::model(format!("Failed to load {}: {e}", path.display()))
            })?;

        tracing::info!(
            path = %path.display(),
            intra_threads,
            load_ms = start.elapsed().as_millis() as u64,
            "ONNX Runtime session ready"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            preprocessing: PreprocessingConfig::U2NETP,
        })
    }

    fn infer(session: &Mutex<Session>, input: Array4<f32>) -> Result<Array4<f32>> {
        let mut session = session
            .lock()
            .map_err(|_| IdPhotoError::internal("ONNX session lock poisoned"))?;

        let input_value = Value::from_array(input)
            .map_err(|e| IdPhotoError::engine_failure("onnx", &format!("input tensor: {e}")))?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| IdPhotoError::engine_failure("onnx", &format!("inference: {e}")))?;

        // U²-Net exposes several side outputs; the first is the fused map
        let first_key = outputs
            .keys()
            .next()
            .map(ToString::to_string)
            .ok_or_else(|| IdPhotoError::engine_failure("onnx", "no output tensors"))?;
        let tensor = outputs
            .get(first_key.as_str())
            .ok_or_else(|| IdPhotoError::engine_failure("onnx", "first output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| IdPhotoError::engine_failure("onnx", &format!("output tensor: {e}")))?;

        let shape = tensor.shape().to_vec();
        let [n, c, h, w] = shape.as_slice() else {
            return Err(IdPhotoError::engine_failure(
                "onnx",
                &format!("expected 4D output tensor, got {}D", shape.len()),
            ));
        };
        Array4::from_shape_vec((*n, *c, *h, *w), tensor.iter().copied().collect())
            .map_err(|e| IdPhotoError::engine_failure("onnx", &format!("reshape output: {e}")))
    }
}

#[async_trait]
impl MattingEngine for OnnxEngine {
    fn name(&self) -> &str {
        "onnx"
    }

    // Inference runs on a blocking thread and finishes even if the call is dropped
    fn preemptible(&self) -> bool {
        false
    }

    async fn remove_background(&self, png: &[u8]) -> Result<Vec<u8>> {
        let session = Arc::clone(&self.session);
        let preprocessing = self.preprocessing;
        let png = png.to_vec();
        tokio::task::spawn_blocking(move || {
            ImagePreprocessor::run_matting(&png, &preprocessing, |input| Self::infer(&session, input))
        })
        .await
        .map_err(|e| IdPhotoError::engine_failure("onnx", &format!("worker task failed: {e}")))?
    }
}

#[cfg(all(test, feature = "onnx"))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file() {
        let err = OnnxEngine::from_file("/nonexistent/u2netp.onnx").unwrap_err();
        assert!(matches!(err, IdPhotoError::Model(_)));
    }
}
