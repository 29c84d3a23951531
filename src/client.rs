//! Registry client for cooperating services
//!
//! Services use this client to register themselves on startup, look up a
//! healthy peer instance and unregister on shutdown.

use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::registry::{ErrorResponse, InstanceRecord};
use crate::server::api::{
    HealthResponse, MessageResponse, RegisterRequest, RegisterResponse, ServicesResponse,
    UnregisterRequest,
};

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the registry client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Registry base URL
    pub registry_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Retry count for failed requests
    pub retry_count: u32,

    /// Retry delay
    pub retry_delay: Duration,
}

impl ClientConfig {
    /// Create a new client config
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(5),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

// ============================================================================
// Registry Client
// ============================================================================

/// Client for communicating with the registry server
pub struct RegistryClient {
    config: ClientConfig,
    http_client: Client,
}

impl RegistryClient {
    /// Create a new registry client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Registry base URL
    pub fn registry_url(&self) -> &str {
        &self.config.registry_url
    }

    /// Register an instance of `name` reachable at `url`
    pub async fn register(
        &self,
        name: &str,
        url: &str,
        instance_id: Option<&str>,
    ) -> Result<RegisterResponse, ClientError> {
        let request = RegisterRequest {
            name: Some(name.to_string()),
            url: Some(url.to_string()),
            instance_id: instance_id.map(str::to_string),
        };

        self.send_with_retry(Method::POST, "/register", Some(&request))
            .await
    }

    /// Unregister one instance of a service
    pub async fn unregister_instance(&self, name: &str, url: &str) -> Result<MessageResponse, ClientError> {
        let request = UnregisterRequest {
            name: Some(name.to_string()),
            url: Some(url.to_string()),
        };

        self.send_with_retry(Method::DELETE, "/unregister", Some(&request))
            .await
    }

    /// Unregister every instance of a service
    pub async fn unregister_service(&self, name: &str) -> Result<MessageResponse, ClientError> {
        let request = UnregisterRequest {
            name: Some(name.to_string()),
            url: None,
        };

        self.send_with_retry(Method::DELETE, "/unregister", Some(&request))
            .await
    }

    /// Snapshot of every registered service
    pub async fn list_services(&self) -> Result<ServicesResponse, ClientError> {
        self.send_with_retry::<(), _>(Method::GET, "/services", None)
            .await
    }

    /// Get the next healthy instance of a service
    pub async fn discover(&self, name: &str) -> Result<InstanceRecord, ClientError> {
        let path = format!("/services/{name}");

        match self.send_with_retry::<(), _>(Method::GET, &path, None).await {
            Err(ClientError::HttpError { status: 404, .. }) => {
                Err(ClientError::ServiceNotFound(name.to_string()))
            }
            Err(ClientError::HttpError { status: 503, .. }) => {
                Err(ClientError::NoHealthyInstances(name.to_string()))
            }
            other => other,
        }
    }

    /// Check registry liveness
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.send_with_retry::<(), _>(Method::GET, "/health", None)
            .await
    }

    // Internal: request with retry on network errors and retryable statuses
    async fn send_with_retry<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R, ClientError> {
        let url = format!("{}{}", self.config.registry_url, path);
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tracing::debug!(url = %url, attempt, "Retrying registry request");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            let mut request = self.http_client.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<R>()
                            .await
                            .map_err(|e| ClientError::ParseError(e.to_string()));
                    }

                    let error = ClientError::HttpError {
                        status: status.as_u16(),
                        message: error_message(response).await,
                    };
                    if !is_retryable(status) {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
                Err(e) => {
                    last_error = Some(ClientError::NetworkError(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::RegistryUnavailable))
    }
}

/// 5xx responses are retried, except 503 which is a definite answer
fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE
}

async fn error_message(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(body) => body.error,
        Err(_) => text,
    }
}

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP error ({status}): {message}")]
    HttpError { status: u16, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("No healthy instances available for {0}")]
    NoHealthyInstances(String),

    #[error("Registry unavailable")]
    RegistryUnavailable,
}

// ============================================================================
// Tests
// ============================================================================
