//! Tract matting backend
//!
//! Pure Rust inference of the same U²-Net-p graph the ONNX Runtime backend
//! uses. No native libraries are required, at the cost of slower inference.

use crate::{
    error::{IdPhotoError, Result},
    inference::MattingEngine,
    models::PreprocessingConfig,
    utils::ImagePreprocessor,
};
use async_trait::async_trait;
use ndarray::Array4;
use std::path::Path;
use std::sync::Arc;
use tract_onnx::prelude::*;

/// Type alias for the optimized, runnable Tract plan
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Matting engine backed by Tract
#[derive(Debug, Clone)]
pub struct TractEngine {
    model: Arc<TractModel>,
    preprocessing: PreprocessingConfig,
}

impl TractEngine {
    /// Load and optimize the model for a fixed 1×3×S×S input
    ///
    /// # Errors
    /// - The model file cannot be read, typed or optimized
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let preprocessing = PreprocessingConfig::U2NETP;
        let side = preprocessing.input_size as usize;
        let start = instant::Instant::now();

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| IdPhotoError::model(format!("Failed to load {}: {e}", path.display())))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .map_err(|e| IdPhotoError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| IdPhotoError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| IdPhotoError::model(format!("Failed to create runnable model: {e}")))?;

        tracing::info!(
            path = %path.display(),
            load_ms = start.elapsed().as_millis() as u64,
            "Tract model ready"
        );

        Ok(Self {
            model: Arc::new(model),
            preprocessing,
        })
    }

    fn infer(model: &TractModel, input: Array4<f32>) -> Result<Array4<f32>> {
        let outputs = model
            .run(tvec![Tensor::from(input).into()])
            .map_err(|e| IdPhotoError::engine_failure("tract", &format!("inference: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| IdPhotoError::engine_failure("tract", "no output tensor"))?
            .into_arc_tensor();
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| IdPhotoError::engine_failure("tract", &format!("output tensor: {e}")))?;

        let shape = view.shape().to_vec();
        let [n, c, h, w] = shape.as_slice() else {
            return Err(IdPhotoError::engine_failure(
                "tract",
                &format!("expected 4D output tensor, got {}D", shape.len()),
            ));
        };
        Array4::from_shape_vec((*n, *c, *h, *w), view.iter().copied().collect())
            .map_err(|e| IdPhotoError::engine_failure("tract", &format!("reshape output: {e}")))
    }
}

#[async_trait]
impl MattingEngine for TractEngine {
    fn name(&self) -> &str {
        "tract"
    }

    // Inference runs on a blocking thread and finishes even if the call is dropped
    fn preemptible(&self) -> bool {
        false
    }

    async fn remove_background(&self, png: &[u8]) -> Result<Vec<u8>> {
        let model = Arc::clone(&self.model);
        let preprocessing = self.preprocessing;
        let png = png.to_vec();
        tokio::task::spawn_blocking(move || {
            ImagePreprocessor::run_matting(&png, &preprocessing, |input| Self::infer(&model, input))
        })
        .await
        .map_err(|e| IdPhotoError::engine_failure("tract", &format!("worker task failed: {e}")))?
    }
}
