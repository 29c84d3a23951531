//! Service registry core
//!
//! This module holds the registration state and the logic acting on it:
//!
//! - [`store`] - instance records grouped by service name
//! - [`selector`] - round-robin choice among healthy instances
//! - [`health`] - background probing that keeps health flags fresh
//! - [`error`] - errors surfaced to API callers
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use service_registry::registry::InstanceStore;
//!
//! let store = Arc::new(InstanceStore::new());
//! store.upsert("ingestion-service", "http://a:5001", None).await;
//! let instance = store.select("ingestion-service").await?;
//! ```

pub mod error;
pub mod health;
pub mod selector;
pub mod store;

pub use error::{ErrorResponse, RegistryError, RegistryResult};
pub use health::{CycleReport, HealthChecker, HealthProbe, HttpProbe, ProbeError};
pub use store::{InstanceRecord, InstanceStore, ProbeTarget, Registration, ServiceGroup, StoreStats};
