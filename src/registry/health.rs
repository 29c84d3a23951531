//! Background health checking of registered instances
//!
//! Every cycle snapshots the registered instances, probes each one
//! concurrently against its health endpoint and writes the result back to
//! the store record by record. The store lock is never held while a probe
//! is in flight. A record removed or re-registered mid-cycle is skipped on
//! write-back.
//!
//! Unhealthy instances stay registered; they are only excluded from
//! selection until a later probe succeeds or the instance re-registers.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::RegistryConfig;
use crate::metrics;

use super::store::{InstanceStore, ProbeTarget};

// ============================================================================
// Probe
// ============================================================================

/// Why a probe classified an instance as unhealthy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error("probe panicked")]
    Panicked,
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Liveness check against one instance base URL
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, base_url: &str) -> Result<(), ProbeError>;
}

/// Probe issuing `GET {base_url}{path}` with a bounded timeout
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpProbe {
    /// Create a probe with the given per-request timeout and health path
    pub fn new(timeout: Duration, path: impl Into<String>) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        Ok(Self {
            client,
            path: path.into(),
        })
    }

    /// Full URL probed for an instance
    pub fn health_url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path)
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, base_url: &str) -> Result<(), ProbeError> {
        let response = self.client.get(self.health_url(base_url)).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}

// ============================================================================
// Health Checker
// ============================================================================

/// Counts from one health check cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub probed: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Results dropped because the record was removed mid-cycle
    pub dropped: usize,
}

/// Periodically probes every registered instance and updates its health flag
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<InstanceStore>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    max_concurrent_probes: usize,
}

impl HealthChecker {
    /// Create a checker with a custom probe
    pub fn new(store: Arc<InstanceStore>, probe: Arc<dyn HealthProbe>, interval: Duration) -> Self {
        Self {
            store,
            probe,
            interval,
            max_concurrent_probes: 16,
        }
    }

    /// Create an HTTP checker from configuration
    pub fn from_config(store: Arc<InstanceStore>, config: &RegistryConfig) -> Result<Self, ProbeError> {
        let probe = HttpProbe::new(config.probe_timeout(), config.health_check_path.clone())?;
        Ok(Self::new(store, Arc::new(probe), config.health_check_interval())
            .with_max_concurrent_probes(config.max_concurrent_probes))
    }

    /// Bound the number of probes in flight
    pub fn with_max_concurrent_probes(mut self, max: usize) -> Self {
        self.max_concurrent_probes = max.max(1);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probe every registered instance once
    ///
    /// A probe that panics only marks its own instance unhealthy.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let targets = self.store.probe_targets().await;
        let mut report = CycleReport::default();

        let mut results = stream::iter(targets)
            .map(|target| {
                let probe = Arc::clone(&self.probe);
                async move {
                    let result = AssertUnwindSafe(probe.probe(&target.url))
                        .catch_unwind()
                        .await
                        .unwrap_or(Err(ProbeError::Panicked));
                    (target, result)
                }
            })
            .buffer_unordered(self.max_concurrent_probes);

        while let Some((target, result)) = results.next().await {
            report.probed += 1;
            self.apply(&target, result, &mut report).await;
        }

        metrics::record_health_cycle(started.elapsed().as_secs_f64());
        metrics::update_store_metrics(&self.store.stats().await);

        tracing::debug!(
            probed = report.probed,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            dropped = report.dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Health check cycle complete"
        );

        report
    }

    async fn apply(&self, target: &ProbeTarget, result: Result<(), ProbeError>, report: &mut CycleReport) {
        let healthy = result.is_ok();

        if let Err(e) = &result {
            metrics::record_probe_failure(&target.service);
            tracing::warn!(
                service = %target.service,
                instance_id = %target.instance_id,
                url = %target.url,
                error = %e,
                "Instance is unhealthy"
            );
        }

        match self.store.set_health_for(target, healthy).await {
            None => {
                report.dropped += 1;
                tracing::debug!(
                    service = %target.service,
                    url = %target.url,
                    "Instance removed or re-registered during health check, result dropped"
                );
            }
            Some(previous) => {
                if healthy {
                    report.healthy += 1;
                } else {
                    report.unhealthy += 1;
                }

                if previous != healthy {
                    if healthy {
                        tracing::info!(
                            service = %target.service,
                            instance_id = %target.instance_id,
                            url = %target.url,
                            "Instance recovered"
                        );
                    } else {
                        tracing::warn!(
                            service = %target.service,
                            instance_id = %target.instance_id,
                            url = %target.url,
                            "Instance became unhealthy"
                        );
                    }
                }
            }
        }
    }

    /// Run cycles forever on the configured interval
    ///
    /// The first cycle starts one interval after spawning. A cycle that
    /// panics is logged and the loop carries on with the next tick. Aborting
    /// the returned handle also cancels a cycle in progress.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut interval = tokio::time::interval_at(start, self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Dropped with this task, which aborts the cycle it holds
            let mut cycles = JoinSet::new();

            tracing::info!(interval_secs = self.interval.as_secs(), "Health checker started");

            loop {
                interval.tick().await;

                let checker = self.clone();
                cycles.spawn(async move { checker.run_cycle().await });

                while let Some(result) = cycles.join_next().await {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Health check cycle aborted");
                    }
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
