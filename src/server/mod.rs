//! Registry server
//!
//! Wires the instance store, the HTTP API and the health checker together.
//!
//! # Architecture
//!
//! ```text
//!   POST /register ─┐
//! DELETE /unregister├──► Instance Store ◄── Health Checker
//!   GET /services  ─┤    (groups, cursors,   (GET {url}/health
//!   GET /services/x─┘     health flags)       every interval)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use service_registry::config::RegistryConfig;
//! use service_registry::server::RegistryServer;
//!
//! let server = RegistryServer::new(RegistryConfig::from_env()?)?;
//! server.start_with_shutdown(shutdown_signal()).await?;
//! ```

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::RegistryConfig;
use crate::registry::{HealthChecker, InstanceStore};

pub use api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Instance store
    pub store: Arc<InstanceStore>,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<InstanceStore>) -> Self {
        Self {
            store,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Registry Server
// ============================================================================

/// Main registry server
pub struct RegistryServer {
    config: RegistryConfig,
    state: AppState,
    checker: HealthChecker,
}

impl RegistryServer {
    /// Create a new registry server with an empty store
    pub fn new(config: RegistryConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let store = Arc::new(InstanceStore::new());
        let checker = HealthChecker::from_config(Arc::clone(&store), &config)
            .map_err(|e| ServerError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            state: AppState::new(store),
            checker,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Shared instance store
    pub fn store(&self) -> Arc<InstanceStore> {
        Arc::clone(&self.state.store)
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server and run until the process exits
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_with_shutdown(std::future::pending::<()>()).await
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::BindError(format!("{}: {}", self.config.bind_address, e)))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener
    ///
    /// The health checker runs for as long as the HTTP server does.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))?;
        tracing::info!("Starting registry server on {}", addr);

        let checker = self.checker.clone().spawn();

        let result = axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        checker.abort();
        tracing::info!("Registry server shutdown complete");

        result
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            health_check_interval_secs: self.config.health_check_interval_secs,
            probe_timeout_secs: self.config.probe_timeout_secs,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub health_check_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Registry Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Health Check Interval: {}s\n\
             Probe Timeout: {}s\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.health_check_interval_secs,
            self.probe_timeout_secs,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Failed to bind: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    ServeError(String),
}

// ============================================================================
// Tests
// ============================================================================
