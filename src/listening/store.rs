use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::ListeningSettings;

/// Persistence for [`ListeningSettings`]. `Ok(None)` means nothing saved yet.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Option<ListeningSettings>>;
    fn save(&self, settings: &ListeningSettings) -> Result<()>;
}

/// JSON file store. Writes go to a temp file first and are renamed into place.
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Option<ListeningSettings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(settings))
    }

    fn save(&self, settings: &ListeningSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path).context("failed to rename temp settings file")?;
        tracing::info!(path = %self.path.display(), "listening settings saved");
        Ok(())
    }
}
