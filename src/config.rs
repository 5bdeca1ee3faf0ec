/// Configuration management for the Prism gateway
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::upstream::UpstreamTarget;

/// Main configuration structure for the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend base URLs and outbound timeouts
    #[serde(default)]
    pub upstreams: UpstreamsConfig,
    /// Response caching configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Metrics and monitoring configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listening address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

/// Backend base URLs, one fixed upstream per domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamsConfig {
    /// Course service base URL (also serves /series)
    #[serde(default = "default_course_url")]
    pub course_url: String,
    /// User service base URL
    #[serde(default = "default_user_url")]
    pub user_url: String,
    /// Enrollment service base URL
    #[serde(default = "default_enrollment_url")]
    pub enrollment_url: String,
    /// Connection timeout for outbound requests
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Read timeout for outbound requests
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
    /// Write timeout for outbound requests
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write_timeout: Duration,
}

/// Response caching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live applied to every cached entry
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub ttl: Duration,
    /// Include the query string in cache keys
    #[serde(default = "default_include_query")]
    pub include_query: bool,
    /// Maximum size of a cacheable response body
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

/// Metrics and monitoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Optional Prometheus exposition listener address
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = if path.ends_with(".yaml") || path.ends_with(".yml") {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config file: {}", path))?
        } else if path.ends_with(".toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config file: {}", path))?
        } else if path.ends_with(".json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config file: {}", path))?
        } else {
            return Err(anyhow::anyhow!(
                "Unsupported config file format. Supported formats: .yaml, .yml, .toml, .json"
            ));
        };

        Ok(config)
    }

    /// Apply environment variable overrides on top of the loaded configuration.
    ///
    /// Recognized variables: `GATEWAY_PORT`, `COURSE_SERVICE_URL`,
    /// `USER_SERVICE_URL`, `ENROLLMENT_SERVICE_URL`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("GATEWAY_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.listen_addr.set_port(port),
                Err(_) => log::warn!("Ignoring invalid GATEWAY_PORT value: {}", port),
            }
        }
        if let Ok(url) = std::env::var("COURSE_SERVICE_URL") {
            self.upstreams.course_url = url;
        }
        if let Ok(url) = std::env::var("USER_SERVICE_URL") {
            self.upstreams.user_url = url;
        }
        if let Ok(url) = std::env::var("ENROLLMENT_SERVICE_URL") {
            self.upstreams.enrollment_url = url;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Every base URL must parse into a usable target at startup, not per request
        UpstreamTarget::from_base_url("course", &self.upstreams.course_url)?;
        UpstreamTarget::from_base_url("user", &self.upstreams.user_url)?;
        UpstreamTarget::from_base_url("enrollment", &self.upstreams.enrollment_url)?;

        if self.cache.ttl.is_zero() {
            return Err(anyhow::anyhow!("Cache TTL must be greater than zero"));
        }
        if self.cache.max_body_size == 0 {
            return Err(anyhow::anyhow!(
                "Cache max body size must be greater than zero"
            ));
        }

        Ok(())
    }
}

// Default value functions
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

fn default_course_url() -> String {
    "http://course-service:8081".to_string()
}

fn default_user_url() -> String {
    "http://user-service:8082".to_string()
}

fn default_enrollment_url() -> String {
    "http://enrollment-service:8083".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_include_query() -> bool {
    true
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        Self {
            course_url: default_course_url(),
            user_url: default_user_url(),
            enrollment_url: default_enrollment_url(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            include_query: default_include_query(),
            max_body_size: default_max_body_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr.port(), 9090);
        assert_eq!(config.upstreams.course_url, "http://course-service:8081");
        assert_eq!(config.upstreams.user_url, "http://user-service:8082");
        assert_eq!(
            config.upstreams.enrollment_url,
            "http://enrollment-service:8083"
        );
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert!(config.cache.include_query);
        assert_eq!(config.cache.max_body_size, 1024 * 1024);
        assert!(config.metrics.prometheus_addr.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
server:
  listen_addr: "127.0.0.1:8080"
upstreams:
  course_url: "http://localhost:8081"
  connect_timeout: "10s"
cache:
  ttl: "1m"
  include_query: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.upstreams.course_url, "http://localhost:8081");
        assert_eq!(config.upstreams.connect_timeout, Duration::from_secs(10));
        // Unset fields fall back to defaults
        assert_eq!(config.upstreams.user_url, "http://user-service:8082");
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert!(!config.cache.include_query);
        assert_eq!(config.cache.max_body_size, 1024 * 1024);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("GATEWAY_PORT", "7000");
        std::env::set_var("COURSE_SERVICE_URL", "http://127.0.0.1:18081");
        std::env::set_var("USER_SERVICE_URL", "http://127.0.0.1:18082");
        std::env::set_var("ENROLLMENT_SERVICE_URL", "http://127.0.0.1:18083");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.listen_addr.port(), 7000);
        assert_eq!(config.upstreams.course_url, "http://127.0.0.1:18081");
        assert_eq!(config.upstreams.user_url, "http://127.0.0.1:18082");
        assert_eq!(config.upstreams.enrollment_url, "http://127.0.0.1:18083");

        std::env::remove_var("GATEWAY_PORT");
        std::env::remove_var("COURSE_SERVICE_URL");
        std::env::remove_var("USER_SERVICE_URL");
        std::env::remove_var("ENROLLMENT_SERVICE_URL");
    }

    #[test]
    fn test_validate_rejects_bad_upstream_url() {
        let mut config = Config::default();
        config.upstreams.user_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upstreams.course_url = "ftp://course-service:21".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = Config::default();
        config.cache.ttl = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
