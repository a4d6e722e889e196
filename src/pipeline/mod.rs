//! Frame pipeline: camera capture → downscale/recompress → base64 data URI.
//!
//! [`FramePipeline::run`] performs one pass. Every step that touches the
//! camera or the codec runs on the blocking pool. Failures come back as a
//! [`PipelineError`]; they never escape as panics, and the caller decides
//! what to do with them (the scanner logs and drops the cycle).

pub mod encode;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::ScanConfig;
use crate::device::{Camera, CaptureOptions};

pub const FRAME_MIME: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("camera capture failed: {0:#}")]
    Capture(anyhow::Error),
    #[error("camera returned an empty frame")]
    EmptyCapture,
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("image processing produced no output")]
    EmptyOutput,
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("pipeline timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data_uri: String,
    pub width: u32,
    pub height: u32,
    pub jpeg_bytes: usize,
    pub source: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub target_width: u32,
    pub jpeg_quality: u8,
    pub capture: CaptureOptions,
}

impl From<&ScanConfig> for PipelineSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            target_width: config.target_width,
            jpeg_quality: config.jpeg_quality,
            capture: CaptureOptions::default(),
        }
    }
}

#[derive(Clone)]
pub struct FramePipeline {
    camera: Arc<dyn Camera>,
    settings: PipelineSettings,
}

impl FramePipeline {
    pub fn new(camera: Arc<dyn Camera>, settings: PipelineSettings) -> Self {
        Self { camera, settings }
    }

    pub async fn run(&self) -> Result<EncodedFrame, PipelineError> {
        // 1. Capture without shutter sound or preview pause
        let camera = Arc::clone(&self.camera);
        let options = self.settings.capture;
        let captured = tokio::task::spawn_blocking(move || camera.capture(&options))
            .await?
            .map_err(PipelineError::Capture)?;

        // 2. Validate
        if captured.bytes.is_empty() {
            return Err(PipelineError::EmptyCapture);
        }
        let source = captured.source;

        // 3. Downscale + recompress
        let (width, quality) = (self.settings.target_width, self.settings.jpeg_quality);
        let bytes = captured.bytes;
        let processed =
            tokio::task::spawn_blocking(move || encode::downscale_jpeg(&bytes, width, quality))
                .await??;

        // 4. Validate
        if processed.jpeg.is_empty() {
            return Err(PipelineError::EmptyOutput);
        }

        // 5. Encode for transport
        let (width, height, jpeg_bytes) = (processed.width, processed.height, processed.jpeg.len());
        let data_uri =
            tokio::task::spawn_blocking(move || encode::to_data_uri(&processed.jpeg, FRAME_MIME))
                .await?;

        Ok(EncodedFrame {
            data_uri,
            width,
            height,
            jpeg_bytes,
            source,
        })
    }

    /// [`run`](Self::run) bounded by `limit`.
    pub async fn run_with_timeout(&self, limit: Duration) -> Result<EncodedFrame, PipelineError> {
        match tokio::time::timeout(limit, self.run()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(limit)),
        }
    }
}
