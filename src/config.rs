use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::auth::CredentialKeys;
use crate::dispatch::{CancelMode, QueuePolicy};
use crate::transport::LogDetail;

/// Streaming endpoint locations, handed in by the host once per session.
#[derive(Debug, Clone)]
pub struct StreamEndpoints {
    base: String,
}

impl StreamEndpoints {
    pub const DEFAULT_BASE: &'static str = "https://stream.twitter.com/1.1";

    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// The random-sample firehose.
    pub fn sample(&self) -> String {
        format!("{}/statuses/sample.json", self.base)
    }

    /// The keyword-filtered stream.
    pub fn filter(&self) -> String {
        format!("{}/statuses/filter.json", self.base)
    }
}

impl Default for StreamEndpoints {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE)
    }
}

/// Tunables for the streaming client core.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// Per-read stall limit on the open connection. The endpoint sends
    /// keep-alive blank lines well inside this window.
    pub read_timeout: Duration,
    pub cache_dir: PathBuf,
    pub cache_ceiling: u64,
    /// Freshness applied to cached responses without a max-age of their own.
    pub cache_lifetime: Duration,
    /// Safety ceiling for a single message unit; larger units are reported
    /// as decode errors and skipped.
    pub max_line_bytes: usize,
    pub queue: QueuePolicy,
    pub cancel_mode: CancelMode,
    pub log_detail: LogDetail,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(90),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(env::temp_dir)
                .join("feedstream")
                .join("http-cache"),
            cache_ceiling: 10 * 1024 * 1024,
            cache_lifetime: Duration::from_secs(60),
            max_line_bytes: 1024 * 1024,
            queue: QueuePolicy::Unbounded,
            cancel_mode: CancelMode::Drain,
            log_detail: LogDetail::None,
        }
    }
}

/// Credential and endpoint configuration for the binary, loaded from a TOML
/// file or from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("feedstream").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Credentials from `FEEDSTREAM_*` environment variables, if all four
    /// are present.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            consumer_key: env::var("FEEDSTREAM_CONSUMER_KEY").ok()?,
            consumer_secret: env::var("FEEDSTREAM_CONSUMER_SECRET").ok()?,
            access_token: env::var("FEEDSTREAM_ACCESS_TOKEN").ok()?,
            access_secret: env::var("FEEDSTREAM_ACCESS_SECRET").ok()?,
            endpoint: env::var("FEEDSTREAM_ENDPOINT").ok(),
        })
    }

    pub fn keys(&self) -> CredentialKeys {
        CredentialKeys {
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
            access_token: self.access_token.clone(),
            access_secret: self.access_secret.clone(),
        }
    }

    pub fn endpoints(&self) -> StreamEndpoints {
        self.endpoint
            .as_deref()
            .map(StreamEndpoints::new)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let endpoints = StreamEndpoints::default();
        assert_eq!(
            endpoints.sample(),
            "https://stream.twitter.com/1.1/statuses/sample.json"
        );
        assert_eq!(
            endpoints.filter(),
            "https://stream.twitter.com/1.1/statuses/filter.json"
        );
    }

    #[test]
    fn test_trailing_slash_is_normalized() {
        let endpoints = StreamEndpoints::new("https://stream.example.com/2/");
        assert_eq!(
            endpoints.sample(),
            "https://stream.example.com/2/statuses/sample.json"
        );
    }

    #[test]
    fn test_file_config_parses() {
        let cfg: FileConfig = toml::from_str(
            r#"
            consumer_key = "ck"
            consumer_secret = "cs"
            access_token = "at"
            access_secret = "as"
            endpoint = "https://stream.example.com/1.1"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.keys().consumer_key, "ck");
        assert_eq!(
            cfg.endpoints().sample(),
            "https://stream.example.com/1.1/statuses/sample.json"
        );
    }
}
