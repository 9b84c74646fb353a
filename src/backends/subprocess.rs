//! External-process matting backend
//!
//! Launches the configured command (by default a Python shim around `rembg`),
//! writes the PNG to its stdin and reads the cutout PNG from stdout. The
//! child is spawned with `kill_on_drop`, so a caller-side timeout that drops
//! the future also terminates the process.

use crate::{
    config::SubprocessConfig,
    error::{IdPhotoError, Result},
    inference::MattingEngine,
};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Bytes of stderr kept in error messages
const STDERR_TAIL: usize = 500;

/// Matting engine backed by an external process
#[derive(Debug, Clone)]
pub struct SubprocessEngine {
    program: String,
    args: Vec<String>,
}

impl SubprocessEngine {
    #[must_use]
    pub fn new(config: &SubprocessConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    /// Command line rendered for logs
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn failure(&self, details: &str) -> IdPhotoError {
        IdPhotoError::engine_failure("subprocess", &format!("{} ({})", details, self.program))
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL.saturating_sub(1))
        .map_or(0, |(idx, _)| idx);
    text.get(start..).unwrap_or_default().to_string()
}

#[async_trait]
impl MattingEngine for SubprocessEngine {
    fn name(&self) -> &str {
        "subprocess"
    }

    #[tracing::instrument(skip(self, png), fields(program = %self.program, input_bytes = png.len()))]
    async fn remove_background(&self, png: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failure(&format!("failed to spawn: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failure("stdin not captured"))?;

        let write = async move {
            stdin.write_all(png).await?;
            stdin.shutdown().await
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| self.failure(&format!("failed to collect output: {}", e)))?;

        if !output.stderr.is_empty() {
            tracing::debug!(stderr = %stderr_tail(&output.stderr), "Matting process stderr");
        }

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(self.failure(&format!(
                "exited with code {}: {}",
                code,
                stderr_tail(&output.stderr)
            )));
        }

        if let Err(e) = written {
            return Err(self.failure(&format!("failed to write input: {}", e)));
        }

        if output.stdout.is_empty() {
            return Err(self.failure("empty output"));
        }

        tracing::debug!(output_bytes = output.stdout.len(), "Matting process finished");
        Ok(output.stdout)
    }
}
