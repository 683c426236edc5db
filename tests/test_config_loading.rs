use snapshot_gateway::config::GatewayConfig;
use snapshot_gateway::error::GatewayError;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
listen_address: "127.0.0.1:8088"
origin_url: "https://archive.example.org/index.tar.gz"
origin_timeout_secs: 10
origin_max_retries: 3
metadata_dir: /srv/snapshots
enable_cache: true
cache_max_entries: 32
cache_max_entry_bytes: 1048576
cache_max_total_bytes: 16777216
cache_smaxage_secs: 3600
metrics_endpoint:
  enabled: true
  address: "127.0.0.1:19090"
"#,
    );

    let config = GatewayConfig::from_file(file.path());
    assert!(config.is_ok(), "Failed to load config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.listen_address, "127.0.0.1:8088");
    assert_eq!(config.origin_url, "https://archive.example.org/index.tar.gz");
    assert_eq!(config.origin_timeout_secs, 10);
    assert_eq!(config.origin_max_retries, 3);
    assert_eq!(config.metadata_dir, "/srv/snapshots");
    assert!(config.enable_cache);
    assert_eq!(config.cache_max_entries, 32);
    assert_eq!(config.cache_max_entry_bytes, 1048576);
    assert_eq!(config.cache_max_total_bytes, 16777216);
    assert_eq!(config.cache_smaxage_secs, 3600);

    let metrics = config.metrics_endpoint.expect("metrics block should parse");
    assert!(metrics.enabled);
    assert_eq!(metrics.address, "127.0.0.1:19090");
}

#[test]
fn test_load_minimal_config() {
    let file = write_config("origin_url: \"http://origin.internal/archive.tar.gz\"\n");

    let config = GatewayConfig::from_file(file.path());
    assert!(config.is_ok());

    let config = config.unwrap();
    assert_eq!(config.origin_url, "http://origin.internal/archive.tar.gz");
    // Check defaults are applied
    assert_eq!(config.listen_address, "0.0.0.0:8080");
    assert_eq!(config.origin_timeout_secs, 30);
    assert_eq!(config.origin_max_retries, 2);
    assert!(config.enable_cache);
    assert_eq!(config.cache_smaxage_secs, 604800);
    assert!(config.metrics_endpoint.is_none());
}

#[test]
fn test_load_invalid_config() {
    // Valid YAML that fails validation
    let file = write_config("origin_timeout_secs: 0\n");

    let config = GatewayConfig::from_file(file.path());
    assert!(config.is_err(), "Should fail validation for a zero timeout");
    assert!(matches!(config, Err(GatewayError::ConfigError(_))));
}

#[test]
fn test_load_bad_origin_scheme() {
    let file = write_config("origin_url: \"ftp://archive.example.org/index.tar.gz\"\n");

    let config = GatewayConfig::from_file(file.path());
    assert!(config.is_err(), "Should reject non-http(s) origin URLs");
}

#[test]
fn test_load_malformed_yaml() {
    let file = write_config("origin_timeout_secs: [unclosed\n");

    let config = GatewayConfig::from_file(file.path());
    assert!(config.is_err(), "Should fail on malformed YAML");
    assert!(matches!(config, Err(GatewayError::ConfigError(_))));
}

#[test]
fn test_load_nonexistent_file() {
    let config = GatewayConfig::from_file("nonexistent.yaml");
    assert!(config.is_err(), "Should fail when file doesn't exist");
}
