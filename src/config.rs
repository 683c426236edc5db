//! Configuration management for the snapshot gateway

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// Config file consulted when no path argument is given
pub const DEFAULT_CONFIG_PATH: &str = "snapshot_gateway.yaml";

/// Configuration for the snapshot gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the gateway listens on (default: "0.0.0.0:8080")
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// URL of the live archive resource at the origin
    /// (default: the public Hackage package index)
    #[serde(default = "default_origin_url")]
    pub origin_url: String,

    /// Deadline for the origin range fetch in seconds (default: 30)
    #[serde(default = "default_origin_timeout")]
    pub origin_timeout_secs: u64,

    /// Retries for transient origin transport failures (default: 2)
    /// Non-206 answers are never retried regardless of this setting.
    #[serde(default = "default_origin_retries")]
    pub origin_max_retries: usize,

    /// Directory holding one `<snapshot-id>.json` document per snapshot
    /// (default: /var/lib/snapshot-gateway/snapshots)
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,

    /// Whether to cache composed responses (default: true)
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Maximum number of cached responses (default: 64)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Largest composed response the cache will hold, in bytes (default: 128MB)
    /// Larger responses are streamed without attempting a cache copy.
    #[serde(default = "default_cache_max_entry_bytes")]
    pub cache_max_entry_bytes: usize,

    /// Total cache budget in bytes (default: 1GB)
    #[serde(default = "default_cache_max_total_bytes")]
    pub cache_max_total_bytes: usize,

    /// Shared-cache freshness lifetime in seconds (default: 604800 = 1 week)
    /// Snapshots are immutable, so this is advertised with `immutable`.
    #[serde(default = "default_cache_smaxage")]
    pub cache_smaxage_secs: u64,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_origin_url() -> String {
    "https://hackage.haskell.org/01-index.tar.gz".to_string()
}

fn default_origin_timeout() -> u64 {
    30
}

fn default_origin_retries() -> usize {
    2
}

fn default_metadata_dir() -> String {
    "/var/lib/snapshot-gateway/snapshots".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    64
}

fn default_cache_max_entry_bytes() -> usize {
    128 * 1024 * 1024 // 128MB
}

fn default_cache_max_total_bytes() -> usize {
    1024 * 1024 * 1024 // 1GB
}

fn default_cache_smaxage() -> u64 {
    604800 // 1 week
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen_address: default_listen_address(),
            origin_url: default_origin_url(),
            origin_timeout_secs: default_origin_timeout(),
            origin_max_retries: default_origin_retries(),
            metadata_dir: default_metadata_dir(),
            enable_cache: default_true(),
            cache_max_entries: default_cache_max_entries(),
            cache_max_entry_bytes: default_cache_max_entry_bytes(),
            cache_max_total_bytes: default_cache_max_total_bytes(),
            cache_smaxage_secs: default_cache_smaxage(),
            metrics_endpoint: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(GatewayConfig)` if loading and validation succeed
    /// * `Err(GatewayError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| GatewayError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration from an optional command-line path
    ///
    /// # Arguments
    /// * `path` - Explicit config file path, if one was given
    ///
    /// # Returns
    /// * With `Some(path)`, the file must load: `Ok` or `Err` as [`Self::from_file`]
    /// * With `None`, [`DEFAULT_CONFIG_PATH`] is loaded when present and the
    ///   built-in defaults run when it is absent
    pub fn resolve(path: Option<&str>) -> Result<Self> {
        Self::resolve_from(path, Path::new(DEFAULT_CONFIG_PATH))
    }

    fn resolve_from(path: Option<&str>, default_path: &Path) -> Result<Self> {
        match path {
            Some(explicit) => Self::from_file(explicit),
            None if default_path.exists() => Self::from_file(default_path),
            None => Ok(Self::default()),
        }
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - listen_address and an enabled metrics address must parse as socket addresses
    /// - origin_url must be an http(s) URL
    /// - origin_timeout_secs must be between 1 and 300
    /// - origin_max_retries must not exceed 10
    /// - cache limits must be non-zero and entry size must fit the total budget
    pub fn validate(&self) -> Result<()> {
        const MAX_TIMEOUT_SECS: u64 = 300;
        const MAX_RETRIES: usize = 10;

        self.listen_address.parse::<SocketAddr>().map_err(|_| {
            GatewayError::ConfigError(format!(
                "listen_address is not a valid socket address: '{}'",
                self.listen_address
            ))
        })?;

        if !self.origin_url.starts_with("http://") && !self.origin_url.starts_with("https://") {
            return Err(GatewayError::ConfigError(format!(
                "origin_url must be an http(s) URL, got '{}'",
                self.origin_url
            )));
        }

        if self.origin_timeout_secs == 0 || self.origin_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(GatewayError::ConfigError(format!(
                "origin_timeout_secs must be between 1 and {}, got {}",
                MAX_TIMEOUT_SECS, self.origin_timeout_secs
            )));
        }

        if self.origin_max_retries > MAX_RETRIES {
            return Err(GatewayError::ConfigError(format!(
                "origin_max_retries must not exceed {}, got {}",
                MAX_RETRIES, self.origin_max_retries
            )));
        }

        if self.metadata_dir.is_empty() {
            return Err(GatewayError::ConfigError(
                "metadata_dir must not be empty".to_string(),
            ));
        }

        if self.enable_cache {
            if self.cache_smaxage_secs == 0 {
                return Err(GatewayError::ConfigError(
                    "cache_smaxage_secs must be greater than 0 when caching is enabled"
                        .to_string(),
                ));
            }
            if self.cache_max_entries == 0 {
                return Err(GatewayError::ConfigError(
                    "cache_max_entries must be greater than 0 when caching is enabled"
                        .to_string(),
                ));
            }
            if self.cache_max_entry_bytes == 0
                || self.cache_max_entry_bytes > self.cache_max_total_bytes
            {
                return Err(GatewayError::ConfigError(format!(
                    "cache_max_entry_bytes must be between 1 and cache_max_total_bytes ({}), got {}",
                    self.cache_max_total_bytes, self.cache_max_entry_bytes
                )));
            }
        }

        if let Some(ref metrics) = self.metrics_endpoint {
            if metrics.enabled {
                metrics.address.parse::<SocketAddr>().map_err(|_| {
                    GatewayError::ConfigError(format!(
                        "metrics_endpoint.address is not a valid socket address: '{}'",
                        metrics.address
                    ))
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_address, "0.0.0.0:8080");
        assert_eq!(
            config.origin_url,
            "https://hackage.haskell.org/01-index.tar.gz"
        );
        assert_eq!(config.origin_timeout_secs, 30);
        assert_eq!(config.origin_max_retries, 2);
        assert!(config.enable_cache);
        assert_eq!(config.cache_smaxage_secs, 604800);
        assert!(config.metrics_endpoint.is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_listen_address() {
        let mut config = GatewayConfig::default();
        config.listen_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_origin_scheme() {
        let mut config = GatewayConfig::default();
        config.origin_url = "ftp://archive.example.com/index.tar.gz".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = GatewayConfig::default();
        config.origin_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_excessive_retries() {
        let mut config = GatewayConfig::default();
        config.origin_max_retries = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_smaxage_with_cache() {
        let mut config = GatewayConfig::default();
        config.cache_smaxage_secs = 0;
        assert!(config.validate().is_err());

        // Valid once caching is off
        config.enable_cache = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_entry_exceeds_total_budget() {
        let mut config = GatewayConfig::default();
        config.cache_max_entry_bytes = 2 * 1024 * 1024 * 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_metrics_address() {
        let mut config = GatewayConfig::default();
        config.metrics_endpoint = Some(MetricsEndpointConfig {
            enabled: true,
            address: "nonsense".to_string(),
        });
        assert!(config.validate().is_err());

        // A disabled endpoint is not validated
        config.metrics_endpoint = Some(MetricsEndpointConfig {
            enabled: false,
            address: "nonsense".to_string(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_yaml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "origin_timeout_secs: 10").unwrap();
        writeln!(file, "metadata_dir: /tmp/snapshots").unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.origin_timeout_secs, 10);
        assert_eq!(config.metadata_dir, "/tmp/snapshots");
        // Unspecified fields fall back to defaults
        assert_eq!(config.listen_address, "0.0.0.0:8080");
        assert!(config.enable_cache);
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "origin_timeout_secs: [not a number").unwrap();

        let result = GatewayConfig::from_file(file.path());
        assert!(matches!(result, Err(GatewayError::ConfigError(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let result = GatewayConfig::from_file("/nonexistent/gateway.yaml");
        assert!(matches!(result, Err(GatewayError::ConfigError(_))));
    }

    #[test]
    fn test_resolve_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let result = GatewayConfig::resolve_from(
            Some("/nonexistent/gateway.yaml"),
            &dir.path().join("snapshot_gateway.yaml"),
        );
        assert!(matches!(result, Err(GatewayError::ConfigError(_))));
    }

    #[test]
    fn test_resolve_missing_default_file_runs_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            GatewayConfig::resolve_from(None, &dir.path().join("snapshot_gateway.yaml")).unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:8080");
        assert_eq!(config.origin_timeout_secs, 30);
        assert!(config.enable_cache);
    }

    #[test]
    fn test_resolve_reads_default_file_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot_gateway.yaml");
        std::fs::write(&path, "origin_timeout_secs: 7\n").unwrap();

        let config = GatewayConfig::resolve_from(None, &path).unwrap();
        assert_eq!(config.origin_timeout_secs, 7);
    }
}
