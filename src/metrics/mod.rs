//! Prometheus metrics for the service registry
//!
//! This module tracks:
//! - Store: registered and healthy instance counts, registrations
//! - Selector: selections per service and outcome
//! - Health checker: probe failures and cycle duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};
use std::sync::OnceLock;

use crate::registry::StoreStats;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all registry metrics
struct RegistryMetrics {
    services: Gauge,
    instances: Gauge,
    healthy_instances: Gauge,
    registrations: CounterVec,
    selections: CounterVec,
    probe_failures: CounterVec,
    health_cycle_duration: Histogram,
}

/// Global storage for registry metrics
static REGISTRY_METRICS: OnceLock<RegistryMetrics> = OnceLock::new();

/// Outcome of the first initialization attempt
static METRICS_INIT: OnceLock<Result<(), String>> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once, including concurrently; only the first call
/// registers anything and later calls return its outcome.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = service_registry::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    METRICS_INIT
        .get_or_init(|| register_metrics().map_err(|e| e.to_string()))
        .clone()
        .map_err(Into::into)
}

fn register_metrics() -> Result<(), prometheus::Error> {
    let metrics = RegistryMetrics {
        services: register_gauge!("registry_services", "Number of registered service groups")?,
        instances: register_gauge!("registry_instances", "Number of registered instances")?,
        healthy_instances: register_gauge!(
            "registry_healthy_instances",
            "Number of instances currently marked healthy"
        )?,
        registrations: register_counter_vec!(
            "registry_registrations_total",
            "Total registrations by service and kind (created, refreshed)",
            &["service", "kind"]
        )?,
        selections: register_counter_vec!(
            "registry_selections_total",
            "Total instance selections by service and outcome",
            &["service", "outcome"]
        )?,
        probe_failures: register_counter_vec!(
            "registry_probe_failures_total",
            "Total failed health probes by service",
            &["service"]
        )?,
        health_cycle_duration: register_histogram!(
            "registry_health_cycle_duration_seconds",
            "Duration of one health check cycle in seconds",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
    };

    // Only reachable once: guarded by METRICS_INIT
    let _ = REGISTRY_METRICS.set(metrics);

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    REGISTRY_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Update store gauges
pub fn update_store_metrics(stats: &StoreStats) {
    if let Some(m) = REGISTRY_METRICS.get() {
        m.services.set(stats.services as f64);
        m.instances.set(stats.instances as f64);
        m.healthy_instances.set(stats.healthy as f64);
    }
}

/// Record a registration
pub fn record_registration(service: &str, created: bool) {
    if let Some(m) = REGISTRY_METRICS.get() {
        let kind = if created { "created" } else { "refreshed" };
        m.registrations.with_label_values(&[service, kind]).inc();
    }
}

/// Record a selection outcome (`selected`, `not_found`, `no_healthy`)
pub fn record_selection(service: &str, outcome: &str) {
    if let Some(m) = REGISTRY_METRICS.get() {
        m.selections.with_label_values(&[service, outcome]).inc();
    }
}

/// Record a failed probe
pub fn record_probe_failure(service: &str) {
    if let Some(m) = REGISTRY_METRICS.get() {
        m.probe_failures.with_label_values(&[service]).inc();
    }
}

/// Record the duration of a health check cycle
pub fn record_health_cycle(duration_secs: f64) {
    if let Some(m) = REGISTRY_METRICS.get() {
        m.health_cycle_duration.observe(duration_secs);
    }
}

// ============================================================================
// Tests
// ============================================================================
