//! Push client configuration
//!
//! Values come from defaults, an optional `[stream]` table in the CLI config
//! file, and `DNOTES_*` environment variables.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::backoff::ReconnectPolicy;
use crate::dedup::DEFAULT_DEDUP_WINDOW;

/// Path of the push stream below the API base
pub const STREAM_PATH: &str = "sse";

/// Default application origin
pub const DEFAULT_ORIGIN: &str = "http://localhost:8000";
/// Port of the frontend development server
pub const DEFAULT_DEV_PORT: u16 = 5173;
/// Backend address used directly while on the development server
pub const DEFAULT_DEV_BACKEND: &str = "http://localhost:5000/api";
/// API path below the origin when nothing else is configured
pub const DEFAULT_API_PATH: &str = "/api";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A URL setting did not parse
    #[error("invalid URL in {key}: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },

    /// A numeric setting did not parse
    #[error("invalid value for {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Where the API lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Origin the application is served from
    pub origin: Url,
    /// Port the host application runs on, if known
    pub local_port: Option<u16>,
    /// Port signature of the development server
    pub dev_port: u16,
    /// Backend base used when running on the development server
    pub dev_backend: Url,
    /// Explicitly configured API base
    pub api_base: Option<Url>,
    /// API path joined to the origin when no base is configured
    pub default_path: String,
}

/// Which setting the API base came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseSource {
    /// Running on the development server, talking to the backend directly
    DevBackend,
    /// Explicitly configured base
    Configured,
    /// Origin plus default path
    Default,
}

impl fmt::Display for BaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DevBackend => "development backend",
            Self::Configured => "configured base",
            Self::Default => "origin default",
        })
    }
}

impl EndpointConfig {
    /// Which setting wins for the next connection attempt
    ///
    /// Priority: development backend, configured base, origin plus default
    /// path.
    pub fn base_source(&self) -> BaseSource {
        if self.local_port == Some(self.dev_port) {
            BaseSource::DevBackend
        } else if self.api_base.is_some() {
            BaseSource::Configured
        } else {
            BaseSource::Default
        }
    }

    /// Resolve the API base for one connection attempt
    pub fn resolve_base(&self) -> Result<Url, url::ParseError> {
        match (self.base_source(), &self.api_base) {
            (BaseSource::DevBackend, _) => Ok(self.dev_backend.clone()),
            (BaseSource::Configured, Some(base)) => Ok(base.clone()),
            _ => self.origin.join(&self.default_path),
        }
    }

    /// Resolve the full push stream URL
    pub fn stream_url(&self) -> Result<Url, url::ParseError> {
        let mut base = self.resolve_base()?;
        // Treat the base as a directory so the stream path is appended
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(STREAM_PATH)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            origin: parse_const(DEFAULT_ORIGIN),
            local_port: None,
            dev_port: DEFAULT_DEV_PORT,
            dev_backend: parse_const(DEFAULT_DEV_BACKEND),
            api_base: None,
            default_path: DEFAULT_API_PATH.to_string(),
        }
    }
}

/// Full push client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// API location
    pub endpoint: EndpointConfig,
    /// Reconnect budget and delays
    pub reconnect: ReconnectPolicy,
    /// Dedup window in milliseconds
    pub dedup_window_ms: u64,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl StreamConfig {
    /// Defaults overlaid with `DNOTES_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay variables looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = &mut self.endpoint;
        if let Some(value) = lookup("DNOTES_ORIGIN") {
            endpoint.origin = parse_url("DNOTES_ORIGIN", &value)?;
        }
        if let Some(value) = lookup("DNOTES_LOCAL_PORT") {
            endpoint.local_port = Some(parse_port("DNOTES_LOCAL_PORT", &value)?);
        }
        if let Some(value) = lookup("DNOTES_DEV_PORT") {
            endpoint.dev_port = parse_port("DNOTES_DEV_PORT", &value)?;
        }
        if let Some(value) = lookup("DNOTES_DEV_BACKEND") {
            endpoint.dev_backend = parse_url("DNOTES_DEV_BACKEND", &value)?;
        }
        if let Some(value) = lookup("DNOTES_API_URL") {
            endpoint.api_base = Some(parse_url("DNOTES_API_URL", &value)?);
        }
        Ok(())
    }

    /// Dedup window
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// TCP connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            reconnect: ReconnectPolicy::default(),
            dedup_window_ms: DEFAULT_DEDUP_WINDOW.as_millis() as u64,
            connect_timeout_ms: 10_000,
        }
    }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl { key, source })
}

fn parse_port(key: &'static str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

fn parse_const(value: &str) -> Url {
    Url::parse(value).expect("built-in URL constants are valid")
}
