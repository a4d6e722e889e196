use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct MemlensConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub scan: ScanConfig,
    pub reconnect: ReconnectConfig,
    pub speech: SpeechConfig,
    pub listening: ListeningConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Recognition channel endpoint; the user token is appended as `?token=`.
    pub ws_url: String,
    /// Base URL of the REST backend.
    pub http_url: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Per-user identity token. Sent as the `token` query parameter on the
    /// channel and as the `Authorization` header on REST calls.
    pub token: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScanConfig {
    pub throttle_ms: u64,
    pub tick_interval_ms: u64,
    pub resume_delay_ms: u64,
    /// Bounds both the capture pipeline and the wait for a sent frame's reply.
    pub capture_timeout_ms: u64,
    pub target_width: u32,
    pub jpeg_quality: u8,
    pub keepalive_secs: u64,
    pub frames_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub growth_factor: f64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SpeechConfig {
    /// Program used to speak names, e.g. `espeak` or `say`. Empty logs only.
    pub command: String,
    pub args: Vec<String>,
    /// Gap between cancelling the previous utterance and starting the next.
    pub restart_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ListeningConfig {
    pub settings_path: String,
    pub segments_dir: String,
    /// Program that records one segment, e.g. `arecord`. Empty disables recording.
    pub recorder_command: String,
    /// Arguments for the recorder; `{seconds}` and `{output}` are substituted.
    pub recorder_args: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8000/ws/face-recognition/".into(),
            http_url: "http://127.0.0.1:8000".into(),
            log_level: "info".into(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        let frames_dir = default_memlens_dir()
            .join("frames")
            .to_string_lossy()
            .into_owned();
        Self {
            throttle_ms: 2000,
            tick_interval_ms: 500,
            resume_delay_ms: 300,
            capture_timeout_ms: 10_000,
            target_width: 320,
            jpeg_quality: 40,
            keepalive_secs: 30,
            frames_dir,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 3000,
            growth_factor: 1.5,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            restart_delay_ms: 100,
        }
    }
}

impl Default for ListeningConfig {
    fn default() -> Self {
        let dir = default_memlens_dir();
        Self {
            settings_path: dir
                .join("listening_settings.json")
                .to_string_lossy()
                .into_owned(),
            segments_dir: dir.join("segments").to_string_lossy().into_owned(),
            recorder_command: String::new(),
            recorder_args: vec![
                "-q".into(),
                "-f".into(),
                "cd".into(),
                "-d".into(),
                "{seconds}".into(),
                "{output}".into(),
            ],
        }
    }
}

impl ScanConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// `None` when keepalive pings are disabled.
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }
}

/// Returns `~/.memlens/`, or `./.memlens` when no home directory is known.
pub fn default_memlens_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memlens")
}

/// Returns the default config file path: `~/.memlens/config.toml`
pub fn default_config_path() -> PathBuf {
    default_memlens_dir().join("config.toml")
}

impl MemlensConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MemlensConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (MEMLENS_WS_URL, MEMLENS_HTTP_URL, MEMLENS_TOKEN, MEMLENS_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMLENS_WS_URL") {
            self.server.ws_url = val;
        }
        if let Ok(val) = std::env::var("MEMLENS_HTTP_URL") {
            self.server.http_url = val;
        }
        if let Ok(val) = std::env::var("MEMLENS_TOKEN") {
            self.auth.token = val;
        }
        if let Ok(val) = std::env::var("MEMLENS_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// The channel URL with the user token attached as a query parameter.
    pub fn channel_url(&self) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.server.ws_url)
            .with_context(|| format!("invalid channel URL: {}", self.server.ws_url))?;
        anyhow::ensure!(
            matches!(url.scheme(), "ws" | "wss"),
            "channel URL must use ws:// or wss://, got {}",
            url.scheme()
        );
        url.query_pairs_mut().append_pair("token", &self.auth.token);
        Ok(url)
    }

    pub fn resolved_frames_dir(&self) -> PathBuf {
        expand_tilde(&self.scan.frames_dir)
    }

    pub fn resolved_settings_path(&self) -> PathBuf {
        expand_tilde(&self.listening.settings_path)
    }

    pub fn resolved_segments_dir(&self) -> PathBuf {
        expand_tilde(&self.listening.segments_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_reference_timings() {
        let config = MemlensConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.scan.throttle_ms, 2000);
        assert_eq!(config.scan.resume_delay_ms, 300);
        assert_eq!(config.scan.target_width, 320);
        assert_eq!(config.reconnect.base_delay_ms, 3000);
        assert_eq!(config.reconnect.growth_factor, 1.5);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert!(config.listening.settings_path.ends_with("listening_settings.json"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
ws_url = "wss://example.org/ws/face-recognition/"
log_level = "debug"

[auth]
token = "uid-123"

[scan]
throttle_ms = 1500
"#;
        let config: MemlensConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.auth.token, "uid-123");
        assert_eq!(config.scan.throttle_ms, 1500);
        // defaults still apply for unset fields
        assert_eq!(config.scan.target_width, 320);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn channel_url_carries_token() {
        let mut config = MemlensConfig::default();
        config.auth.token = "abc def".into();
        let url = config.channel_url().unwrap();
        assert_eq!(url.path(), "/ws/face-recognition/");
        assert_eq!(url.query(), Some("token=abc+def"));
    }

    #[test]
    fn channel_url_rejects_http_scheme() {
        let mut config = MemlensConfig::default();
        config.server.ws_url = "http://127.0.0.1:8000/ws/".into();
        assert!(config.channel_url().is_err());
    }

    #[test]
    fn keepalive_zero_disables() {
        let mut scan = ScanConfig::default();
        assert_eq!(scan.keepalive(), Some(Duration::from_secs(30)));
        scan.keepalive_secs = 0;
        assert_eq!(scan.keepalive(), None);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = MemlensConfig::default();
        std::env::set_var("MEMLENS_WS_URL", "ws://10.0.0.2:9000/ws/");
        std::env::set_var("MEMLENS_TOKEN", "env-token");
        std::env::set_var("MEMLENS_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.server.ws_url, "ws://10.0.0.2:9000/ws/");
        assert_eq!(config.auth.token, "env-token");
        assert_eq!(config.server.log_level, "trace");

        // Clean up
        std::env::remove_var("MEMLENS_WS_URL");
        std::env::remove_var("MEMLENS_TOKEN");
        std::env::remove_var("MEMLENS_LOG_LEVEL");
    }
}
