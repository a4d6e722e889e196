//! Host collaborators the scanner drives but does not own.
//!
//! Provides the [`Camera`], [`Speaker`] and [`Notifier`] traits plus desktop
//! implementations: a directory-backed camera, a command-line speech
//! synthesizer and a log-based notifier.
//!
//! All methods are synchronous. Callers in async contexts use
//! `tokio::task::spawn_blocking`.

pub mod camera;
pub mod speech;

use anyhow::Result;

use crate::scanner::Alert;

pub use camera::DirectoryCamera;
pub use speech::{CommandSpeaker, LogSpeaker};

/// Options for a still capture taken while the live preview keeps running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    /// Encoder quality hint in `[0.0, 1.0]`.
    pub quality: f32,
    pub shutter_sound: bool,
    pub pause_preview: bool,
    pub exif: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            quality: 0.3,
            shutter_sound: false,
            pause_preview: false,
            exif: false,
        }
    }
}

/// Encoded image bytes as delivered by the camera.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub bytes: Vec<u8>,
    /// Where the frame came from, for logs.
    pub source: String,
}

pub trait Camera: Send + Sync {
    /// Ask for (or re-check) access. `Ok(false)` means denied.
    fn request_permission(&self) -> Result<bool>;

    /// Bring the device up. Success is the "camera ready" signal.
    fn prepare(&self) -> Result<()>;

    fn capture(&self, options: &CaptureOptions) -> Result<CapturedFrame>;
}

pub trait Speaker: Send + Sync {
    /// Start speaking `text`. Returns once the utterance has been started.
    fn speak(&self, text: &str) -> Result<()>;

    /// Cancel the utterance in progress, if any.
    fn stop(&self);
}

pub trait Notifier: Send + Sync {
    fn alert(&self, alert: &Alert);
}

/// Writes alerts to the log. Blocking alerts go out at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, alert: &Alert) {
        if alert.blocking {
            tracing::error!(title = %alert.title, "{}", alert.message);
        } else {
            tracing::warn!(title = %alert.title, "{}", alert.message);
        }
    }
}
