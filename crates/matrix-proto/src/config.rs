use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::channel::ChannelId;
use super::platform;

pub const APP_NAME: &str = "RTSPMatrix";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

/// Where and how the recorder's RTSP streams are reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_rtsp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub subtype: u32,
    /// Interleave RTP over the RTSP TCP connection instead of UDP.
    #[serde(default = "default_true")]
    pub tcp: bool,
    #[serde(default = "default_network_caching_ms")]
    pub network_caching_ms: u64,
    /// How long a tile may stay in Opening before it is marked failed.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_tiles")]
    pub default_tiles: usize,
    #[serde(default = "default_views_file")]
    pub views_file: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

/// Native drawables supplied by the host UI.  Tiles without a surface let the
/// player open its own window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub tile_surfaces: Vec<u64>,
    #[serde(default)]
    pub fullscreen_surface: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Mpv,
    /// In-memory sessions that play immediately.  For dry runs without mpv.
    Scripted,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_control_port")]
    pub port: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_rtsp_port(),
            user: String::new(),
            password: String::new(),
            path: default_path(),
            subtype: 0,
            tcp: true,
            network_caching_ms: default_network_caching_ms(),
            open_timeout_ms: default_open_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            default_tiles: default_tiles(),
            views_file: default_views_file(),
            state_file: default_state_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_control_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rtsp_port() -> u16 {
    554
}

fn default_path() -> String {
    "/cam/realmonitor".to_string()
}

fn default_true() -> bool {
    true
}

fn default_network_caching_ms() -> u64 {
    250
}

fn default_open_timeout_ms() -> u64 {
    2500
}

fn default_title() -> String {
    APP_NAME.to_string()
}

fn default_tiles() -> usize {
    4
}

fn default_views_file() -> PathBuf {
    platform::data_dir().join("views.json")
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8990
}

fn default_control_port() -> u16 {
    platform::CONTROL_TCP_PORT
}

/// Configuration problems detected once at startup.  Fatal.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("stream.host must not be empty")]
    EmptyHost,
    #[error("stream.port must be non-zero")]
    ZeroPort,
    #[error("stream.path must start with '/', got {0:?}")]
    BadPath(String),
    #[error("stream.open_timeout_ms must be non-zero")]
    ZeroOpenTimeout,
    #[error("app.default_tiles must be within 1..=16, got {0}")]
    TileCount(usize),
}

impl StreamConfig {
    /// Connection URL for a channel.  Credentials are not embedded here; the
    /// media backend receives them separately.
    pub fn url(&self, channel: ChannelId) -> String {
        format!(
            "rtsp://{}:{}{}?channel={}&subtype={}",
            self.host,
            self.port,
            self.path,
            channel.get(),
            self.subtype
        )
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read `path`, writing defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.stream;
        if s.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if s.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if !s.path.starts_with('/') {
            return Err(ConfigError::BadPath(s.path.clone()));
        }
        if s.open_timeout_ms == 0 {
            return Err(ConfigError::ZeroOpenTimeout);
        }
        if !(1..=16).contains(&self.app.default_tiles) {
            return Err(ConfigError::TileCount(self.app.default_tiles));
        }
        Ok(())
    }

    /// Surface for tile `idx`, if the host supplied one.
    pub fn tile_surface(&self, idx: usize) -> Option<u64> {
        self.display.tile_surfaces.get(idx).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stream.port, 554);
        assert_eq!(config.stream.open_timeout_ms, 2500);
        assert!(config.stream.tcp);
        assert_eq!(config.app.default_tiles, 4);
        assert!(config.http.enabled);
        assert_eq!(config.mpv.backend, BackendKind::Mpv);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_url_format() {
        let stream = StreamConfig {
            host: "10.0.0.9".into(),
            subtype: 1,
            ..StreamConfig::default()
        };
        let url = stream.url(ChannelId::new(7).unwrap());
        assert_eq!(url, "rtsp://10.0.0.9:554/cam/realmonitor?channel=7&subtype=1");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [stream]
            host = "nvr.local"
            open_timeout_ms = 4000

            [mpv]
            backend = "scripted"
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.host, "nvr.local");
        assert_eq!(config.stream.open_timeout_ms, 4000);
        assert_eq!(config.stream.path, "/cam/realmonitor");
        assert_eq!(config.mpv.backend, BackendKind::Scripted);
        assert_eq!(config.control.port, platform::CONTROL_TCP_PORT);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.stream.host = " ".into();
        assert_eq!(config.validate(), Err(ConfigError::EmptyHost));

        let mut config = Config::default();
        config.stream.path = "cam".into();
        assert_eq!(config.validate(), Err(ConfigError::BadPath("cam".into())));

        let mut config = Config::default();
        config.stream.open_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroOpenTimeout));

        let mut config = Config::default();
        config.app.default_tiles = 17;
        assert_eq!(config.validate(), Err(ConfigError::TileCount(17)));
    }

    #[test]
    fn test_load_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.stream.host, "127.0.0.1");
        let again = Config::load_from(&path).unwrap();
        assert_eq!(again.stream.path, config.stream.path);
    }
}
