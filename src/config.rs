//! Configuration Module
//!
//! Loads the YAML configuration file and validates it before anything is
//! started.

use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::ConfigError;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "EDGE_CACHE_CONFIG";

/// Configuration file read when `EDGE_CACHE_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Seconds a cached entry is trusted before it is revalidated (15 minutes)
pub const DEFAULT_VALIDATION_INTERVAL: u64 = 900;

const VALID_CACHE_TYPES: [&str; 2] = ["memory", "memcached"];
const VALID_PROTOCOLS: [&str; 2] = ["http", "https"];

// == Config ==
/// Top level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Admin API listener
    pub api: ApiConfig,
    /// Cache store selection and options
    pub cache: CacheConfig,
    /// Proxy listener and origin backends
    pub proxy: ProxyConfig,
}

/// Admin API listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 7546,
        }
    }
}

/// Cache store selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `memory` or `memcached`
    #[serde(rename = "type")]
    pub kind: String,
    /// Store specific options, all values kept as strings
    #[serde(deserialize_with = "scalar_map")]
    pub options: HashMap<String, String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut options = HashMap::new();
        options.insert("memory_limit".to_string(), "10240".to_string());
        options.insert("ttl".to_string(), "86400".to_string());
        Self {
            kind: "memory".to_string(),
            options,
        }
    }
}

/// Proxy listener and the virtual hosts it serves.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub address: String,
    pub port: u16,
    /// Scheme clients use to reach this listener, part of every cache key
    pub scheme: String,
    /// Background tasks writing responses into the cache
    pub store_workers: usize,
    /// Pending cache writes before new ones are dropped
    pub store_queue: usize,
    pub backends: Vec<BackendConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 80,
            scheme: "http".to_string(),
            store_workers: 4,
            store_queue: 1024,
            backends: Vec::new(),
        }
    }
}

/// A website served through the proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    /// Virtual host clients request
    pub domain: String,
    /// Origin address
    pub ip: String,
    /// Origin port, 0 uses the protocol default
    #[serde(default)]
    pub port: u16,
    /// `http` or `https`
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Seconds before a cached entry is revalidated with the origin
    #[serde(default = "default_validation_interval")]
    pub validation_interval: u64,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_validation_interval() -> u64 {
    DEFAULT_VALIDATION_INTERVAL
}

/// Accepts scalar YAML values (`10240`, `true`, `"a,b"`) as strings.
fn scalar_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "option {} must be a scalar, got {:?}",
                        key, other
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

impl Config {
    // == Loading ==
    /// Parses a YAML document. Missing sections keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads and parses the file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Loads the file named by `EDGE_CACHE_CONFIG` (default `config.yml`).
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is
    /// an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        match Self::from_file(&path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("config file {} not found, using defaults", path);
                Ok(Self::default())
            }
            other => other,
        }
    }

    // == Validation ==
    /// Checks listeners, cache type and backends.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_listener("API", &self.api.address, self.api.port)?;
        validate_listener("proxy", &self.proxy.address, self.proxy.port)?;

        if !VALID_CACHE_TYPES.contains(&self.cache.kind.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid cache type '{}'",
                self.cache.kind
            )));
        }

        if !VALID_PROTOCOLS.contains(&self.proxy.scheme.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid proxy scheme '{}'",
                self.proxy.scheme
            )));
        }

        if self.proxy.store_workers == 0 || self.proxy.store_queue == 0 {
            return Err(ConfigError::Invalid(
                "store_workers and store_queue must be positive".to_string(),
            ));
        }

        for backend in &self.proxy.backends {
            backend.validate()?;
        }

        Ok(())
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.domain.is_empty() || self.ip.parse::<IpAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "invalid backend '{}' ({})",
                self.name, self.domain
            )));
        }
        if !VALID_PROTOCOLS.contains(&self.protocol.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid protocol '{}' for backend '{}'",
                self.protocol, self.name
            )));
        }
        Ok(())
    }
}

fn validate_listener(name: &str, address: &str, port: u16) -> Result<(), ConfigError> {
    if address.parse::<IpAddr>().is_err() {
        return Err(ConfigError::Invalid(format!("invalid {} address", name)));
    }
    if port == 0 {
        return Err(ConfigError::Invalid(format!("invalid {} port", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> BackendConfig {
        BackendConfig {
            name: "example".to_string(),
            domain: "www.example.com".to_string(),
            ip: "127.0.0.1".to_string(),
            port: 8080,
            protocol: "http".to_string(),
            validation_interval: DEFAULT_VALIDATION_INTERVAL,
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.api.port, 7546);
        assert_eq!(config.proxy.port, 80);
        assert_eq!(config.cache.kind, "memory");
        assert_eq!(config.cache.options.get("memory_limit").unwrap(), "10240");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
cache:
  type: memcached
  options:
    endpoints: "10.0.0.1:11211,10.0.0.2:11211"
    ttl: 3600
proxy:
  port: 8080
  backends:
    - name: example
      domain: www.example.com
      ip: 10.1.1.1
      port: 8081
      protocol: https
      validation_interval: 60
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.cache.kind, "memcached");
        assert_eq!(config.cache.options.get("ttl").unwrap(), "3600");
        assert_eq!(config.proxy.port, 8080);
        assert_eq!(config.proxy.scheme, "http");
        assert_eq!(config.api.port, 7546);
        assert_eq!(config.proxy.backends[0].protocol, "https");
        assert_eq!(config.proxy.backends[0].validation_interval, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_defaults() {
        let yaml = r#"
proxy:
  backends:
    - { name: a, domain: a.com, ip: 127.0.0.1 }
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let backend = &config.proxy.backends[0];

        assert_eq!(backend.port, 0);
        assert_eq!(backend.protocol, "http");
        assert_eq!(backend.validation_interval, DEFAULT_VALIDATION_INTERVAL);
    }

    #[test]
    fn test_option_must_be_scalar() {
        let yaml = "cache:\n  options:\n    patterns: [a, b]\n";
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_cache_type() {
        let mut config = Config::default();
        config.cache.kind = "redis".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_listener() {
        let mut config = Config::default();
        config.api.address = "localhost".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.proxy.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_backend() {
        assert!(backend().validate().is_ok());

        let mut bad_ip = backend();
        bad_ip.ip = "example.com".to_string();
        assert!(bad_ip.validate().is_err());

        let mut no_name = backend();
        no_name.name.clear();
        assert!(no_name.validate().is_err());

        let mut bad_protocol = backend();
        bad_protocol.protocol = "ftp".to_string();
        assert!(bad_protocol.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/edge-cache.yml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
