//! Origin routing
//!
//! Maps the virtual hosts served by the proxy to their origin servers. The
//! table is built once from configuration and never mutated.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::{ConfigError, ProxyError};

// == Protocol ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

// == Origin ==
/// Where requests for one virtual host are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub ip: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    /// Age after which a cached entry is revalidated
    pub validation_interval: Duration,
}

impl Origin {
    /// `proto://domain:port`, the prefix of every origin request URL.
    ///
    /// The domain is kept in the URL so TLS and the origin's virtual hosting
    /// see the client's host name; the client's DNS override points it at
    /// `ip`.
    pub fn base_url(&self, domain: &str) -> String {
        format!("{}://{}:{}", self.protocol.as_str(), domain, self.port)
    }
}

// == Origin Table ==
/// Read-only map from virtual host to origin.
#[derive(Debug, Clone, Default)]
pub struct OriginTable {
    origins: HashMap<String, Origin>,
}

impl OriginTable {
    /// Builds the table from validated backend configuration.
    pub fn from_backends(backends: &[BackendConfig]) -> Result<Self, ConfigError> {
        let mut origins = HashMap::new();

        for backend in backends {
            backend.validate()?;
            let protocol = match backend.protocol.as_str() {
                "https" => Protocol::Https,
                _ => Protocol::Http,
            };
            let ip: IpAddr = backend
                .ip
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid backend ip '{}'", backend.ip)))?;
            let port = match backend.port {
                0 => protocol.default_port(),
                port => port,
            };

            origins.insert(
                backend.domain.to_ascii_lowercase(),
                Origin {
                    ip,
                    port,
                    protocol,
                    validation_interval: Duration::from_secs(backend.validation_interval),
                },
            );
        }

        Ok(Self { origins })
    }

    /// Finds the origin for a `Host` header value, ignoring any port.
    ///
    /// Returns the bare domain together with its origin.
    pub fn resolve<'a>(&self, host: &'a str) -> Result<(&'a str, &Origin), ProxyError> {
        let domain = strip_port(host);
        self.origins
            .get(&domain.to_ascii_lowercase())
            .map(|origin| (domain, origin))
            .ok_or_else(|| ProxyError::UnknownHost(host.to_string()))
    }

    /// Builds the origin HTTP client: fixed timeout, and every configured
    /// domain resolved straight to its origin address.
    pub fn client(&self, timeout: Duration) -> reqwest::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(timeout).no_proxy();
        for (domain, origin) in &self.origins {
            builder = builder.resolve(domain, SocketAddr::new(origin.ip, origin.port));
        }
        builder.build()
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

/// Removes a trailing `:port` from a host, leaving IPv6 literals intact.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.parse::<u16>().is_ok() => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(domain: &str, port: u16, protocol: &str) -> BackendConfig {
        BackendConfig {
            name: domain.to_string(),
            domain: domain.to_string(),
            ip: "10.0.0.1".to_string(),
            port,
            protocol: protocol.to_string(),
            validation_interval: 60,
        }
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("www.example.com"), "www.example.com");
        assert_eq!(strip_port("www.example.com:8080"), "www.example.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("host:notaport"), "host:notaport");
    }

    #[test]
    fn test_resolve() {
        let table = OriginTable::from_backends(&[
            backend("www.example.com", 8080, "http"),
            backend("secure.example.com", 0, "https"),
        ])
        .unwrap();

        let (domain, origin) = table.resolve("www.example.com:80").unwrap();
        assert_eq!(domain, "www.example.com");
        assert_eq!(origin.port, 8080);
        assert_eq!(origin.protocol, Protocol::Http);
        assert_eq!(origin.validation_interval, Duration::from_secs(60));

        let (_, origin) = table.resolve("SECURE.example.com").unwrap();
        assert_eq!(origin.port, 443);
        assert_eq!(origin.base_url("secure.example.com"), "https://secure.example.com:443");
    }

    #[test]
    fn test_resolve_unknown_host() {
        let table = OriginTable::from_backends(&[backend("www.example.com", 80, "http")]).unwrap();
        assert!(matches!(
            table.resolve("other.example.com"),
            Err(ProxyError::UnknownHost(_))
        ));
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let mut bad = backend("www.example.com", 80, "http");
        bad.ip = "not-an-ip".to_string();
        assert!(OriginTable::from_backends(&[bad]).is_err());
    }

    #[test]
    fn test_client_builds() {
        let table = OriginTable::from_backends(&[backend("www.example.com", 80, "http")]).unwrap();
        assert!(table.client(Duration::from_secs(10)).is_ok());
    }
}
