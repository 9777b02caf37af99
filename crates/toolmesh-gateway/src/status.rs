//! Status aggregation for `/health`, `/status`, `/metrics` and `/tools`.
//!
//! Liveness is answered from memory without looking at backends. The full
//! status joins every backend descriptor with its health record and the
//! rolling dispatch counters.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use toolmesh_common::{GatewayError, Result};
use toolmesh_metrics::exposition::{self, Exposition};
use toolmesh_metrics::GatewayMetricsCollector;

use crate::health::{HealthRecord, HealthStatus};
use crate::health_monitor::HealthMonitor;
use crate::registry::{ServiceRegistry, ToolSpec};

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessReport {
    pub status: &'static str,
    pub service: String,
    pub version: String,
    pub uptime_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// One row of `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub base_url: String,
    pub status: HealthStatus,
    pub tools: Vec<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Latency of the last health check
    pub last_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_changed_at: DateTime<Utc>,
    pub success_count: u64,
    pub error_count: u64,
    /// Latency of the last dispatched call
    pub last_call_latency_ms: Option<u64>,
}

/// `GET /status` body.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_ms: u64,
    pub health_checks_enabled: bool,
    pub backends_total: usize,
    pub backends_connected: usize,
    /// "N of M connected"
    pub summary: String,
    pub backends: Vec<BackendStatus>,
}

/// `GET /tools` body.
#[derive(Debug, Clone, Serialize)]
pub struct ToolListing<'a> {
    pub count: usize,
    pub tools: Vec<&'a ToolSpec>,
}

#[derive(Clone)]
pub struct StatusAggregator {
    registry: Arc<ServiceRegistry>,
    monitor: HealthMonitor,
    metrics: GatewayMetricsCollector,
}

impl StatusAggregator {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        monitor: HealthMonitor,
        metrics: GatewayMetricsCollector,
    ) -> Self {
        Self {
            registry,
            monitor,
            metrics,
        }
    }

    pub fn liveness(&self) -> LivenessReport {
        let info = self.metrics.info();
        LivenessReport {
            status: "ok",
            service: info.service,
            version: info.version,
            uptime_ms: info.uptime_ms,
            timestamp: Utc::now(),
        }
    }

    pub async fn status(&self) -> StatusReport {
        let info = self.metrics.info();
        let records = self.monitor.records(&self.registry).await;

        let backends: Vec<BackendStatus> = self
            .registry
            .backends()
            .iter()
            .zip(records)
            .map(|(backend, record)| {
                let counters = self.metrics.backend(&backend.name).unwrap_or_default();
                BackendStatus {
                    name: backend.name.clone(),
                    base_url: backend.base_url.clone(),
                    status: record.status,
                    tools: backend.tool_names.clone(),
                    last_checked_at: record.last_checked_at,
                    last_latency_ms: record.last_latency_ms,
                    consecutive_failures: record.consecutive_failures,
                    last_error: record.last_error,
                    last_changed_at: record.last_changed_at,
                    success_count: counters.success_count,
                    error_count: counters.error_count,
                    last_call_latency_ms: counters.last_latency_ms,
                }
            })
            .collect();

        let backends_total = backends.len();
        let backends_connected = backends.iter().filter(|b| b.status.is_connected()).count();

        StatusReport {
            service: info.service,
            version: info.version,
            timestamp: Utc::now(),
            uptime_ms: info.uptime_ms,
            health_checks_enabled: self.monitor.is_enabled(),
            backends_total,
            backends_connected,
            summary: format!("{} of {} connected", backends_connected, backends_total),
            backends,
        }
    }

    pub fn tools(&self) -> ToolListing<'_> {
        let tools = self.registry.tools();
        ToolListing {
            count: tools.len(),
            tools,
        }
    }

    /// Prometheus page: dispatch counters plus health gauges.
    pub async fn render_metrics(&self) -> Result<String> {
        let records = self.monitor.records(&self.registry).await;
        let connected = records.iter().filter(|r| r.status.is_connected()).count();

        let page = Exposition::new();
        self.metrics.write_prometheus(&page).map_err(metrics_error)?;
        write_health(&page, &records, connected).map_err(metrics_error)?;
        page.render().map_err(metrics_error)
    }
}

fn write_health(
    page: &Exposition,
    records: &[HealthRecord],
    connected: usize,
) -> exposition::Result<()> {
    page.int_gauge("toolmesh_backends", "Configured backends")?
        .set(records.len() as i64);
    page.int_gauge(
        "toolmesh_backends_connected",
        "Backends currently healthy or degraded",
    )?
    .set(connected as i64);

    let health = page.gauge_vec(
        "toolmesh_backend_health",
        "1 for the backend's current health status",
        &["backend", "status"],
    )?;
    let failures = page.gauge_vec(
        "toolmesh_backend_consecutive_failures",
        "Consecutive failed checks or calls",
        &["backend"],
    )?;
    for record in records {
        let backend = record.backend_name.as_str();
        health
            .with_label_values(&[backend, record.status.as_str()])
            .set(1.0);
        failures
            .with_label_values(&[backend])
            .set(f64::from(record.consecutive_failures));
    }
    Ok(())
}

fn metrics_error(e: exposition::Error) -> GatewayError {
    GatewayError::Internal(format!("metrics exposition failed: {}", e))
}
