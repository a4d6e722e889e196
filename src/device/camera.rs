//! Directory-backed camera: replays image files as if they were live frames.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};

use super::{Camera, CaptureOptions, CapturedFrame};

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Cycles through the images in a directory in file-name order.
pub struct DirectoryCamera {
    dir: PathBuf,
    frames: Mutex<Vec<PathBuf>>,
    cursor: AtomicUsize,
}

impl DirectoryCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scan_frames(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read frames directory {}", self.dir.display()))?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_frame_file(path))
            .collect();
        frames.sort();
        Ok(frames)
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl Camera for DirectoryCamera {
    fn request_permission(&self) -> Result<bool> {
        Ok(self.dir.is_dir())
    }

    fn prepare(&self) -> Result<()> {
        let frames = self.scan_frames()?;
        anyhow::ensure!(
            !frames.is_empty(),
            "no .jpg/.jpeg/.png frames in {}",
            self.dir.display()
        );
        tracing::info!(dir = %self.dir.display(), frames = frames.len(), "camera ready");
        let mut guard = self
            .frames
            .lock()
            .map_err(|_| anyhow::anyhow!("frame list lock poisoned"))?;
        *guard = frames;
        Ok(())
    }

    fn capture(&self, _options: &CaptureOptions) -> Result<CapturedFrame> {
        let path = {
            let frames = self
                .frames
                .lock()
                .map_err(|_| anyhow::anyhow!("frame list lock poisoned"))?;
            anyhow::ensure!(!frames.is_empty(), "camera not prepared");
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % frames.len();
            frames[index].clone()
        };

        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read frame {}", path.display()))?;
        Ok(CapturedFrame {
            bytes,
            source: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cycles_frames_in_name_order() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.jpg"), b"second").unwrap();
        std::fs::write(tmp.path().join("a.png"), b"first").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();

        let camera = DirectoryCamera::new(tmp.path());
        assert!(camera.request_permission().unwrap());
        camera.prepare().unwrap();

        let options = CaptureOptions::default();
        assert_eq!(camera.capture(&options).unwrap().bytes, b"first");
        assert_eq!(camera.capture(&options).unwrap().bytes, b"second");
        assert_eq!(camera.capture(&options).unwrap().bytes, b"first");
    }

    #[test]
    fn empty_directory_is_not_ready() {
        let tmp = TempDir::new().unwrap();
        let camera = DirectoryCamera::new(tmp.path());
        assert!(camera.prepare().is_err());
        assert!(camera.capture(&CaptureOptions::default()).is_err());
    }

    #[test]
    fn missing_directory_denies_permission() {
        let camera = DirectoryCamera::new("/nonexistent/memlens/frames");
        assert!(!camera.request_permission().unwrap());
    }
}
