//! Proxy configuration.
//!
//! Loaded once at startup from an optional YAML file (path in `CONFIG`),
//! validated, then shared read-only. `LISTEN` overrides the listen address.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("route {service:?}: invalid target {target:?}: {reason}")]
    InvalidTarget {
        service: String,
        target: String,
        reason: String,
    },
    #[error("no_route_status {0} is not a valid HTTP status")]
    InvalidStatus(u16),
    #[error("local_ip {0:?} must not contain whitespace or ';'")]
    InvalidLocalIp(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Address the proxy listens on (e.g. "127.0.0.1:8080").
    pub listen_addr: String,
    pub proxy: ProxyConfig,
    pub routes: Vec<RouteConfig>,
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            proxy: ProxyConfig::default(),
            routes: Vec::new(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Settings that shape the forwarding headers.
///
/// Empty strings disable the corresponding rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Extra header stamped with the client IP.
    pub client_ip_header: String,
    /// Address of this proxy instance, appended to `Forwarded` as `by=`.
    pub local_ip: String,
    /// Header set on requests that arrived over TLS.
    pub tls_header: String,
    pub tls_header_value: String,
    /// Status returned when no route matches.
    pub no_route_status: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            client_ip_header: String::new(),
            local_ip: String::new(),
            tls_header: String::new(),
            tls_header_value: String::new(),
            no_route_status: 404,
        }
    }
}

/// One entry of the static routing table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Service name, used in logs.
    pub service: String,
    /// Host to match, without port. Empty matches any host.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Backend URL, e.g. "http://10.0.0.5:3000".
    pub target: String,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

impl Config {
    /// Loads the configuration from the environment.
    ///
    /// Reads the YAML file named by `CONFIG` when set, otherwise starts from
    /// defaults, then applies `LISTEN`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var_os("CONFIG") {
            Some(path) => Self::parse_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let cfg = Self::parse_file(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(100..=599).contains(&self.proxy.no_route_status) {
            return Err(ConfigError::InvalidStatus(self.proxy.no_route_status));
        }

        let local_ip = &self.proxy.local_ip;
        if local_ip.contains(|c: char| c.is_whitespace() || c == ';') {
            return Err(ConfigError::InvalidLocalIp(local_ip.clone()));
        }

        for route in &self.routes {
            let invalid = |reason: String| ConfigError::InvalidTarget {
                service: route.service.clone(),
                target: route.target.clone(),
                reason,
            };
            let url = url::Url::parse(&route.target).map_err(|e| invalid(e.to_string()))?;
            if url.scheme() != "http" {
                return Err(invalid(format!("unsupported scheme {}", url.scheme())));
            }
            if url.host_str().is_none() {
                return Err(invalid("missing host".to_string()));
            }
        }

        Ok(())
    }
}
