/// Configuration management for the community client
///
/// Loads configuration from environment variables.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use resilience::{mutation_policy, presets::query_policy_with_backoff, RequestPolicy};

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Remote API settings
    pub api: ApiConfig,
    /// Cache settings
    pub cache: CacheConfig,
    /// Session persistence
    pub session: SessionConfig,
    /// Log output
    pub logging: LoggingConfig,
    /// Metrics export
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, e.g. `http://community_backend.test/api`
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries for read requests (writes never retry)
    #[serde(default = "default_query_retries")]
    pub query_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Age after which a cached view is refetched on read
    #[serde(default = "default_stale_secs")]
    pub stale_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub credentials_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus text file written on exit, for a textfile collector
    pub textfile_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

// Default values
fn default_request_timeout_secs() -> u64 {
    15
}

fn default_query_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_stale_secs() -> u64 {
    300
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid {}: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api = ApiConfig {
            base_url: std::env::var("COMMUNITY_API_URL")
                .context("COMMUNITY_API_URL must be set")?,
            request_timeout_secs: env_or(
                "COMMUNITY_REQUEST_TIMEOUT_SECS",
                default_request_timeout_secs(),
            )?,
            query_retries: env_or("COMMUNITY_QUERY_RETRIES", default_query_retries())?,
            retry_backoff_ms: env_or("COMMUNITY_RETRY_BACKOFF_MS", default_retry_backoff_ms())?,
        };

        let cache = CacheConfig {
            stale_secs: env_or("COMMUNITY_STALE_SECS", default_stale_secs())?,
        };

        let session = SessionConfig {
            credentials_path: std::env::var("COMMUNITY_CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".community/credentials.json")),
        };

        let logging = LoggingConfig {
            format: env_or("COMMUNITY_LOG_FORMAT", LogFormat::default())?,
        };

        let metrics = MetricsConfig {
            textfile_path: std::env::var("COMMUNITY_METRICS_PATH").ok().map(PathBuf::from),
        };

        Ok(Self {
            api,
            cache,
            session,
            logging,
            metrics,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.cache.stale_secs)
    }

    pub fn query_policy(&self) -> RequestPolicy {
        query_policy_with_backoff(
            self.request_timeout(),
            self.api.query_retries,
            Duration::from_millis(self.api.retry_backoff_ms),
        )
    }

    pub fn mutation_policy(&self) -> RequestPolicy {
        mutation_policy(self.request_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "COMMUNITY_API_URL",
        "COMMUNITY_REQUEST_TIMEOUT_SECS",
        "COMMUNITY_QUERY_RETRIES",
        "COMMUNITY_RETRY_BACKOFF_MS",
        "COMMUNITY_STALE_SECS",
        "COMMUNITY_CREDENTIALS_PATH",
        "COMMUNITY_LOG_FORMAT",
        "COMMUNITY_METRICS_PATH",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        std::env::set_var("COMMUNITY_API_URL", "http://localhost:8000/api");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000/api");
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.api.query_retries, 2);
        assert_eq!(config.stale_after(), Duration::from_secs(300));
        assert_eq!(
            config.session.credentials_path,
            PathBuf::from(".community/credentials.json")
        );
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.mutation_policy().retry.is_none());
        assert_eq!(config.mutation_policy().timeout.duration, Duration::from_secs(15));
        assert!(config.metrics.textfile_path.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_url_fails() {
        clear_env();
        let err = ClientConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("COMMUNITY_API_URL"));
    }

    #[test]
    #[serial]
    fn test_overrides_and_invalid_values() {
        clear_env();
        std::env::set_var("COMMUNITY_API_URL", "http://api.test");
        std::env::set_var("COMMUNITY_QUERY_RETRIES", "5");
        std::env::set_var("COMMUNITY_LOG_FORMAT", "JSON");
        std::env::set_var("COMMUNITY_METRICS_PATH", "/tmp/community.prom");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.query_policy().retry_or_single().max_retries, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.metrics.textfile_path,
            Some(PathBuf::from("/tmp/community.prom"))
        );

        std::env::set_var("COMMUNITY_REQUEST_TIMEOUT_SECS", "soon");
        let err = ClientConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("COMMUNITY_REQUEST_TIMEOUT_SECS"));
        clear_env();
    }
}
