//! Matting model provisioning for the embedded backends
//!
//! The embedded backends run a U²-Net-p ONNX graph. `ModelStore` makes sure
//! the file exists locally before an engine is built, downloading it from the
//! configured mirrors in order when missing.

use crate::error::{IdPhotoError, Result};
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Mirrors tried in order when the model file is missing
pub const DEFAULT_MODEL_URLS: &[&str] = &[
    "https://huggingface.co/onnx-community/u2netp/resolve/main/u2netp.onnx?download=true",
    "https://github.com/xuebinqin/U-2-Net/releases/download/v1.0/u2netp.onnx",
];

/// File name of the model inside the model directory
pub const MODEL_FILE_NAME: &str = "u2netp.onnx";

/// Anything smaller is an error page or a truncated download
pub const MIN_MODEL_BYTES: u64 = 1_000_000;

/// Tensor preprocessing parameters of a matting model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessingConfig {
    /// Square input side in pixels
    pub input_size: u32,
    /// Per-channel mean (RGB), applied after scaling to 0-1
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation (RGB)
    pub normalization_std: [f32; 3],
}

impl PreprocessingConfig {
    /// U²-Net-p: 320×320 input, ImageNet statistics
    pub const U2NETP: Self = Self {
        input_size: 320,
        normalization_mean: [0.485, 0.456, 0.406],
        normalization_std: [0.229, 0.224, 0.225],
    };
}

/// Local model directory plus download mirrors
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    urls: Vec<String>,
}

impl ModelStore {
    /// Create a store; `dir = None` uses the platform cache directory
    ///
    /// # Errors
    /// - No directory given and no platform cache directory could be determined
    pub fn new(dir: Option<PathBuf>, urls: Vec<String>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir,
            None => Self::default_dir()?,
        };
        Ok(Self { dir, urls })
    }

    /// `<cache dir>/idphoto-backend/models`
    pub fn default_dir() -> Result<PathBuf> {
        dirs::cache_dir()
            .map(|cache| cache.join("idphoto-backend").join("models"))
            .ok_or_else(|| IdPhotoError::model("Could not determine a cache directory for models"))
    }

    /// Model directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the model file
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE_NAME)
    }

    /// Whether a plausible model file is already present
    #[must_use]
    pub fn is_available(&self) -> bool {
        Self::is_plausible(&self.model_path())
    }

    fn is_plausible(path: &Path) -> bool {
        std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > MIN_MODEL_BYTES)
    }

    /// Return the model path, downloading the file first when needed
    ///
    /// # Errors
    /// - Model directory cannot be created
    /// - Every mirror failed or returned a file below the size floor
    #[tracing::instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn ensure_model(&self) -> Result<PathBuf> {
        let target = self.model_path();
        if Self::is_plausible(&target) {
            tracing::debug!(path = %target.display(), "Model already present");
            return Ok(target);
        }
        if self.urls.is_empty() {
            return Err(IdPhotoError::model(format!(
                "{} missing and no download mirrors configured",
                target.display()
            )));
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            IdPhotoError::model(format!("Failed to create {}: {}", self.dir.display(), e))
        })?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| IdPhotoError::model(format!("Failed to create HTTP client: {}", e)))?;

        let partial = self.dir.join(format!("{}.part", MODEL_FILE_NAME));
        let mut failures = Vec::new();
        for url in &self.urls {
            tracing::info!(%url, "Downloading matting model");
            match download_file(&client, url, &partial).await {
                Ok(bytes) if bytes > MIN_MODEL_BYTES => {
                    tokio::fs::rename(&partial, &target).await?;
                    tracing::info!(bytes, path = %target.display(), "Matting model ready");
                    return Ok(target);
                },
                Ok(bytes) => {
                    tracing::warn!(%url, bytes, "Downloaded model is too small, trying next mirror");
                    failures.push(format!("{}: only {} bytes", url, bytes));
                },
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Model download failed, trying next mirror");
                    failures.push(format!("{}: {}", url, e));
                },
            }
        }

        let _ = tokio::fs::remove_file(&partial).await;
        Err(IdPhotoError::model(format!(
            "Unable to download {}: {}",
            MODEL_FILE_NAME,
            failures.join("; ")
        )))
    }
}

/// Stream `url` into `path`, returning the number of bytes written
async fn download_file(client: &Client, url: &str, path: &Path) -> Result<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| IdPhotoError::model(format!("Request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(IdPhotoError::model(format!("HTTP error {}", response.status())));
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| IdPhotoError::model(format!("Download interrupted: {}", e)))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
