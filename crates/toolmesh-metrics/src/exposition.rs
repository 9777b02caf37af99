// Copyright 2025 toolmesh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Prometheus text exposition for `GET /metrics`.
//!
//! The dispatch counters live in [`MetricsRegistry`](crate::MetricsRegistry)
//! as plain atomics. At scrape time they are copied into a fresh
//! `prometheus::Registry` and encoded with `TextEncoder`, so a page always
//! reflects exactly one snapshot.

use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::snapshot::MetricsSnapshot;

pub use prometheus::{Error, Result};

/// Content type for the text exposition format.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// One scrape's worth of metric families.
///
/// Callers register families, fill them, then [`render`](Self::render).
pub struct Exposition {
    registry: Registry,
}

impl Exposition {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    pub fn counter_vec(&self, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
        let counter = IntCounterVec::new(Opts::new(name, help), labels)?;
        self.registry.register(Box::new(counter.clone()))?;
        Ok(counter)
    }

    pub fn gauge_vec(&self, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
        let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    pub fn gauge(&self, name: &str, help: &str) -> Result<Gauge> {
        let gauge = Gauge::with_opts(Opts::new(name, help))?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    pub fn int_gauge(&self, name: &str, help: &str) -> Result<IntGauge> {
        let gauge = IntGauge::with_opts(Opts::new(name, help))?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for Exposition {
    fn default() -> Self {
        Self::new()
    }
}

/// Adds every dispatch counter in `snapshot` under the `toolmesh_` prefix.
pub fn write_snapshot(exposition: &Exposition, snapshot: &MetricsSnapshot) -> Result<()> {
    exposition
        .gauge("toolmesh_uptime_seconds", "Seconds since the coordinator started")?
        .set(snapshot.uptime_ms as f64 / 1000.0);

    let requests = exposition.counter_vec(
        "toolmesh_requests_total",
        "Tool call requests by outcome",
        &["outcome"],
    )?;
    requests
        .with_label_values(&["success"])
        .inc_by(snapshot.successful_requests);
    requests
        .with_label_values(&["error"])
        .inc_by(snapshot.failed_requests);
    requests
        .with_label_values(&["rejected"])
        .inc_by(snapshot.rejected_requests);

    let errors = exposition.counter_vec(
        "toolmesh_errors_total",
        "Error envelopes by error code",
        &["code"],
    )?;
    for (code, count) in &snapshot.errors_by_code {
        errors.with_label_values(&[code.as_str()]).inc_by(*count);
    }

    let tool_calls = exposition.counter_vec(
        "toolmesh_tool_calls_total",
        "Dispatched calls per tool",
        &["tool", "backend", "outcome"],
    )?;
    let latency = exposition.gauge_vec(
        "toolmesh_tool_latency_seconds",
        "Dispatch latency quantiles per tool",
        &["tool", "quantile"],
    )?;
    for (tool, metrics) in &snapshot.tools {
        let tool = tool.as_str();
        let backend = metrics.backend.as_str();
        tool_calls
            .with_label_values(&[tool, backend, "success"])
            .inc_by(metrics.success_count);
        tool_calls
            .with_label_values(&[tool, backend, "error"])
            .inc_by(metrics.failure_count);

        for (quantile, value_us) in [
            ("0.5", metrics.p50_latency_us),
            ("0.95", metrics.p95_latency_us),
            ("0.99", metrics.p99_latency_us),
        ] {
            latency
                .with_label_values(&[tool, quantile])
                .set(value_us as f64 / 1_000_000.0);
        }
    }

    let backend_requests = exposition.counter_vec(
        "toolmesh_backend_requests_total",
        "Dispatched calls per backend",
        &["backend", "outcome"],
    )?;
    let last_latency = exposition.gauge_vec(
        "toolmesh_backend_last_latency_seconds",
        "Latency of the most recent call to each backend",
        &["backend"],
    )?;
    for (backend, metrics) in &snapshot.backends {
        let backend = backend.as_str();
        backend_requests
            .with_label_values(&[backend, "success"])
            .inc_by(metrics.success_count);
        backend_requests
            .with_label_values(&[backend, "error"])
            .inc_by(metrics.error_count);
        if let Some(ms) = metrics.last_latency_ms {
            last_latency
                .with_label_values(&[backend])
                .set(ms as f64 / 1000.0);
        }
    }

    Ok(())
}
