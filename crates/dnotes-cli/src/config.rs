//! Configuration file handling for dnotes-cli

use anyhow::{Context, Result};
use dnotes_client::StreamConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default API base URL
    pub server: Option<String>,
    /// Bearer token
    pub token: Option<String>,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
    /// Push client settings
    pub stream: Option<StreamConfig>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("dnotes");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments and environment over config file values
    ///
    /// Precedence for the API base: `--server`, `DNOTES_*` variables, the
    /// `server` key, the `[stream.endpoint]` table.
    pub fn merge_with_args<F>(
        &self,
        server: Option<&str>,
        token: Option<&str>,
        no_color: bool,
        env: F,
    ) -> Result<MergedConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut stream = self.stream.clone().unwrap_or_default();

        if let Some(server) = &self.server {
            stream.endpoint.api_base =
                Some(Url::parse(server).with_context(|| format!("Invalid server URL: {server}"))?);
        }
        stream
            .apply_env(env)
            .context("Invalid DNOTES_* environment variable")?;
        if let Some(server) = server {
            stream.endpoint.api_base =
                Some(Url::parse(server).with_context(|| format!("Invalid server URL: {server}"))?);
        }

        Ok(MergedConfig {
            stream,
            token: token.map(String::from).or_else(|| self.token.clone()),
            no_color: no_color || self.no_color.unwrap_or(false),
        })
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub stream: StreamConfig,
    pub token: Option<String>,
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server = "https://notes.example.com/api"
token = "from-file"
output = "json"

[stream]
dedup_window_ms = 1500

[stream.reconnect]
max_attempts = 3
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.token.as_deref(), Some("from-file"));
        assert_eq!(config.output.as_deref(), Some("json"));

        let merged = config.merge_with_args(None, None, false, no_env).unwrap();
        assert_eq!(merged.stream.reconnect.max_attempts, 3);
        assert_eq!(merged.stream.reconnect.base_delay_ms, 1000);
        assert_eq!(merged.stream.dedup_window_ms, 1500);
        assert_eq!(
            merged.stream.endpoint.stream_url().unwrap().as_str(),
            "https://notes.example.com/api/sse"
        );
    }

    #[test]
    fn test_args_win_over_file() {
        let config = Config {
            server: Some("https://file.example/api".into()),
            token: Some("file-token".into()),
            no_color: Some(true),
            ..Default::default()
        };

        let merged = config
            .merge_with_args(Some("http://localhost:5000/api"), Some("arg-token"), false, no_env)
            .unwrap();

        assert_eq!(merged.token.as_deref(), Some("arg-token"));
        assert!(merged.no_color);
        assert_eq!(
            merged.stream.endpoint.stream_url().unwrap().as_str(),
            "http://localhost:5000/api/sse"
        );
    }

    #[test]
    fn test_env_beats_file_server() {
        let config = Config {
            server: Some("https://file.example/api".into()),
            ..Default::default()
        };
        let env = |key: &str| (key == "DNOTES_API_URL").then(|| "https://env.example/api".to_string());

        let merged = config.merge_with_args(None, None, false, env).unwrap();
        assert_eq!(
            merged.stream.endpoint.api_base.unwrap().as_str(),
            "https://env.example/api"
        );
    }

    #[test]
    fn test_bad_server_is_reported() {
        let err = Config::default()
            .merge_with_args(Some("not a url"), None, false, no_env)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid server URL"));
    }
}
