//! Unified error handling for the service-registry crate
//!
//! Each module defines its own error type. This module wraps them in a
//! single [`Error`] enum for callers that cross module boundaries, such as
//! the command-line entry point.

use thiserror::Error;

pub use crate::client::ClientError;
pub use crate::config::ConfigError;
pub use crate::registry::{ProbeError, RegistryError};
pub use crate::server::ServerError;

/// Unified error type for the service-registry crate
#[derive(Error, Debug)]
pub enum Error {
    /// Store, selector or request validation errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Health probe errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Registry client errors
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server lifecycle errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type using the unified error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying the failed operation could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Registry(RegistryError::NoHealthyInstances { .. }) => true,
            Self::Registry(_) => false,
            Self::Probe(_) => true,
            Self::Client(ClientError::NetworkError(_))
            | Self::Client(ClientError::RegistryUnavailable)
            | Self::Client(ClientError::NoHealthyInstances(_)) => true,
            Self::Client(ClientError::HttpError { status, .. }) => *status >= 500,
            Self::Client(_) => false,
            Self::Config(_) => false,
            Self::Server(ServerError::BindError(_)) => true,
            Self::Server(_) => false,
            Self::Io(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        let err: Error = RegistryError::not_found("x").into();
        assert!(matches!(err, Error::Registry(_)));

        let err: Error = ProbeError::Timeout.into();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_is_recoverable() {
        let err: Error = RegistryError::NoHealthyInstances {
            service: "x".to_string(),
        }
        .into();
        assert!(err.is_recoverable());

        let err: Error = RegistryError::validation("Missing name or url").into();
        assert!(!err.is_recoverable());

        let err: Error = ClientError::HttpError {
            status: 502,
            message: String::new(),
        }
        .into();
        assert!(err.is_recoverable());

        let err: Error = ClientError::ServiceNotFound("x".to_string()).into();
        assert!(!err.is_recoverable());
    }
}
