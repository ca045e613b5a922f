//! Relay configuration
//!
//! Loaded from an optional TOML file, then overridden by environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Error, Result};

/// Environment variable naming the config file
pub const ENV_CONFIG_PATH: &str = "MJPEG_RELAY_CONFIG";
pub const ENV_UPSTREAM_URL: &str = "MJPEG_RELAY_UPSTREAM_URL";
pub const ENV_BOUNDARY: &str = "MJPEG_RELAY_BOUNDARY";
pub const ENV_HOST: &str = "MJPEG_RELAY_HOST";
pub const ENV_PORT: &str = "MJPEG_RELAY_PORT";

/// Upstream camera settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// MJPEG source URL (plain http only)
    pub url: String,
    /// Multipart boundary token used by the camera
    pub boundary: String,
    pub connect_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub idle_poll_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            boundary: DEFAULT_BOUNDARY.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

/// Viewer-facing HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-viewer session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Pause between snapshot checks while streaming is disabled
    pub disabled_poll_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            disabled_poll_ms: DEFAULT_DISABLED_POLL_MS,
        }
    }
}

impl ViewerConfig {
    pub fn disabled_poll(&self) -> Duration {
        Duration::from_millis(self.disabled_poll_ms)
    }
}

/// Complete relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub upstream: UpstreamConfig,
    pub server: ServerConfig,
    pub viewer: ViewerConfig,
}

impl RelayConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    /// Load from `path` if it exists, otherwise start from defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "mjpeg-relay")
            .map(|dirs| dirs.config_dir().join("relay.toml"))
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_UPSTREAM_URL) {
            self.upstream.url = url;
        }
        if let Some(boundary) = lookup(ENV_BOUNDARY) {
            self.upstream.boundary = boundary;
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_PORT} is not a port: {port}")))?;
        }
        Ok(())
    }

    /// Check for values the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        let boundary = &self.upstream.boundary;
        if boundary.is_empty() {
            return Err(Error::Config("boundary must not be empty".into()));
        }
        if boundary.contains(['\r', '\n']) {
            return Err(Error::Config("boundary must not contain line breaks".into()));
        }
        if !self.upstream.url.starts_with("http://") {
            return Err(Error::Config(format!(
                "upstream url must use http://, got '{}'",
                self.upstream.url
            )));
        }
        if self.upstream.connect_timeout_ms == 0
            || self.upstream.retry_backoff_ms == 0
            || self.upstream.idle_poll_ms == 0
            || self.viewer.disabled_poll_ms == 0
        {
            return Err(Error::Config("intervals must be greater than zero".into()));
        }
        if self.upstream.max_frame_bytes == 0 {
            return Err(Error::Config("max_frame_bytes must be greater than zero".into()));
        }
        Ok(())
    }
}
