pub mod backend;
pub mod listen;
pub mod scan;

use std::path::Path;

use anyhow::{Context, Result};

use memlens::config::{default_config_path, MemlensConfig};

/// Print the effective configuration. The token is masked.
pub fn show_config(config: &MemlensConfig, path: Option<&Path>) -> Result<()> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    let source = if path.exists() { "" } else { " (not found, defaults)" };
    println!("# {}{source}", path.display());

    let mut shown = config.clone();
    if !shown.auth.token.is_empty() {
        shown.auth.token = mask(&shown.auth.token);
    }
    let rendered = toml::to_string_pretty(&shown).context("failed to render config")?;
    println!("{rendered}");
    Ok(())
}

fn mask(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{visible}…")
}
