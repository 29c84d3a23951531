//! service-registry - service discovery with client-side load balancing
//!
//! Services register their running instances under a logical name; consumers
//! ask the registry for a healthy instance instead of hard-coding addresses.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`registry`] - Instance store, round-robin selector and health checker
//! - [`server`] - HTTP API and server lifecycle
//! - [`client`] - Client used by services to register and discover peers
//! - [`config`] - Configuration from environment and builder
//! - [`metrics`] - Prometheus metrics
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use service_registry::config::RegistryConfig;
//! use service_registry::server::RegistryServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RegistryConfig::from_env()?;
//!     let server = RegistryServer::new(config)?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod server;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{ClientConfig, ClientError, RegistryClient};
    pub use crate::config::RegistryConfig;
    pub use crate::error::{Error, Result};
    pub use crate::registry::{
        HealthChecker, HealthProbe, InstanceRecord, InstanceStore, RegistryError,
    };
    pub use crate::server::{AppState, RegistryServer};
}

// Direct re-exports for convenience
pub use registry::{InstanceRecord, InstanceStore, RegistryError};
