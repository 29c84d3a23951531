//! Registry configuration
//!
//! Values come from defaults, then environment variables, then command-line
//! flags, in increasing order of precedence.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Default port for the registry API
pub const DEFAULT_PORT: u16 = 5000;

/// Configuration for the registry server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Seconds between health check cycles
    pub health_check_interval_secs: u64,

    /// Timeout for a single instance probe in seconds
    pub probe_timeout_secs: u64,

    /// Path probed on every instance
    pub health_check_path: String,

    /// Upper bound on probes in flight during a cycle
    pub max_concurrent_probes: usize,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            health_check_interval_secs: 30,
            probe_timeout_secs: 5,
            health_check_path: "/health".to_string(),
            max_concurrent_probes: 16,
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl RegistryConfig {
    /// Create a new config builder
    pub fn builder() -> RegistryConfigBuilder {
        RegistryConfigBuilder::default()
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `REGISTRY_BIND_HOST`: Bind host [default: 0.0.0.0]
    /// - `REGISTRY_SERVICE_PORT`: Bind port [default: 5000]
    /// - `REGISTRY_HEALTH_INTERVAL_SECS`: Seconds between cycles [default: 30]
    /// - `REGISTRY_PROBE_TIMEOUT_SECS`: Probe timeout [default: 5]
    /// - `REGISTRY_HEALTH_PATH`: Probed path [default: /health]
    /// - `REGISTRY_MAX_CONCURRENT_PROBES`: Probes in flight [default: 16]
    /// - `REGISTRY_ENABLE_CORS`: Enable CORS [default: true]
    /// - `REGISTRY_REQUEST_LOGGING`: Enable request logging [default: true]
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut builder = Self::builder();

        if let Some(host) = read_var::<IpAddr>("REGISTRY_BIND_HOST")? {
            builder = builder.host(host);
        }
        if let Some(port) = read_var::<u16>("REGISTRY_SERVICE_PORT")? {
            builder = builder.port(port);
        }

        builder
            .health_check_interval_secs(
                read_var("REGISTRY_HEALTH_INTERVAL_SECS")?
                    .unwrap_or(defaults.health_check_interval_secs),
            )
            .probe_timeout_secs(
                read_var("REGISTRY_PROBE_TIMEOUT_SECS")?.unwrap_or(defaults.probe_timeout_secs),
            )
            .health_check_path(
                env::var("REGISTRY_HEALTH_PATH").unwrap_or(defaults.health_check_path),
            )
            .max_concurrent_probes(
                read_var("REGISTRY_MAX_CONCURRENT_PROBES")?
                    .unwrap_or(defaults.max_concurrent_probes),
            )
            .enable_cors(read_var("REGISTRY_ENABLE_CORS")?.unwrap_or(defaults.enable_cors))
            .enable_request_logging(
                read_var("REGISTRY_REQUEST_LOGGING")?.unwrap_or(defaults.enable_request_logging),
            )
            .build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_check_interval_secs".to_string(),
                reason: "Must be at least 1 second".to_string(),
            });
        }

        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "probe_timeout_secs".to_string(),
                reason: "Must be at least 1 second".to_string(),
            });
        }

        if self.probe_timeout_secs >= self.health_check_interval_secs {
            return Err(ConfigError::InvalidValue {
                field: "probe_timeout_secs".to_string(),
                reason: "Timeout must be less than the health check interval".to_string(),
            });
        }

        if self.max_concurrent_probes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_probes".to_string(),
                reason: "Must allow at least 1 probe".to_string(),
            });
        }

        if !self.health_check_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "health_check_path".to_string(),
                reason: format!("Path must start with '/': {}", self.health_check_path),
            });
        }

        Ok(())
    }

    /// Interval between health check cycles
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Timeout for a single probe
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn read_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

/// Builder for RegistryConfig
#[derive(Debug, Default)]
pub struct RegistryConfigBuilder {
    bind_address: Option<SocketAddr>,
    host: Option<IpAddr>,
    port: Option<u16>,
    health_check_interval_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    health_check_path: Option<String>,
    max_concurrent_probes: Option<usize>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl RegistryConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        })?);
        Ok(self)
    }

    /// Set bind host, keeping the port
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }

    /// Set bind port, keeping the host
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set health check interval
    pub fn health_check_interval_secs(mut self, secs: u64) -> Self {
        self.health_check_interval_secs = Some(secs);
        self
    }

    /// Set probe timeout
    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.probe_timeout_secs = Some(secs);
        self
    }

    /// Set probed path
    pub fn health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = Some(path.into());
        self
    }

    /// Set max concurrent probes
    pub fn max_concurrent_probes(mut self, max: usize) -> Self {
        self.max_concurrent_probes = Some(max);
        self
    }

    /// Enable/disable CORS
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<RegistryConfig, ConfigError> {
        let defaults = RegistryConfig::default();

        let mut bind_address = self.bind_address.unwrap_or(defaults.bind_address);
        if let Some(host) = self.host {
            bind_address.set_ip(host);
        }
        if let Some(port) = self.port {
            bind_address.set_port(port);
        }

        let config = RegistryConfig {
            bind_address,
            health_check_interval_secs: self
                .health_check_interval_secs
                .unwrap_or(defaults.health_check_interval_secs),
            probe_timeout_secs: self.probe_timeout_secs.unwrap_or(defaults.probe_timeout_secs),
            health_check_path: self.health_check_path.unwrap_or(defaults.health_check_path),
            max_concurrent_probes: self
                .max_concurrent_probes
                .unwrap_or(defaults.max_concurrent_probes),
            enable_cors: self.enable_cors.unwrap_or(defaults.enable_cors),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
}
