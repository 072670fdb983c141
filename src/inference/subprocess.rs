//! Detector backed by an external program
//!
//! Each request launches the configured program, writes the frame as PNG to
//! its stdin and reads a JSON array of detections from its stdout.

use futures::future::BoxFuture;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::InferenceConfig;
use crate::error::InferenceError;

use super::{Detection, DetectorMode, InferenceService};

/// Runs one detector subprocess per image
#[derive(Debug, Clone)]
pub struct CommandDetector {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

impl InferenceService for CommandDetector {
    fn detect(
        &self,
        image: RgbImage,
        mode: DetectorMode,
    ) -> BoxFuture<'static, Result<Vec<Detection>, InferenceError>> {
        let command = self.command.clone();
        let args = self.args.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let mut png = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .map_err(|e| InferenceError::Failed(format!("PNG encode failed: {}", e)))?;

            let mut child = Command::new(&command)
                .args(&args)
                .args(["--mode", mode.as_str()])
                .kill_on_drop(true)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| InferenceError::Spawn(format!("'{}': {}", command, e)))?;

            tracing::debug!(
                "Detector started (pid: {:?}, {} bytes in)",
                child.id(),
                png.len()
            );

            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&png).await {
                        tracing::debug!("Detector closed stdin early: {}", e);
                    }
                });
            }

            let output = tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| InferenceError::Timeout(timeout.as_millis() as u64))?
                .map_err(|e| InferenceError::Failed(e.to_string()))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(InferenceError::Failed(format!(
                    "detector exited with {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }

            serde_json::from_slice::<Vec<Detection>>(&output.stdout)
                .map_err(|e| InferenceError::Parse(e.to_string()))
        })
    }
}
