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

use crate::exposition::{self, write_snapshot, Exposition};
use crate::registry::MetricsRegistry;
use crate::snapshot::{BackendMetrics, MetricsSnapshot, ServerInfo};
use std::sync::Arc;
use std::time::Instant;
use toolmesh_common::{ErrorCode, ToolCallResult};

/// Metrics collection for the coordinator.
///
/// Wraps a shared [`MetricsRegistry`] and knows how to turn dispatcher
/// results into counter updates. Cloning is cheap; clones share the same
/// registry.
///
/// # Example
///
/// ```rust
/// use toolmesh_metrics::GatewayMetricsCollector;
/// use toolmesh_common::ErrorCode;
/// use std::time::Instant;
///
/// let collector = GatewayMetricsCollector::new("toolmesh");
///
/// let start = Instant::now();
/// // ... forward the call ...
/// collector.record_call("store_memory", Some("memory"), start, None);
/// collector.record_rejection(ErrorCode::RateLimited);
///
/// assert_eq!(collector.snapshot().total_requests, 2);
/// ```
#[derive(Debug, Clone)]
pub struct GatewayMetricsCollector {
    service: String,
    registry: Arc<MetricsRegistry>,
}

impl GatewayMetricsCollector {
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_registry(service, Arc::new(MetricsRegistry::new()))
    }

    pub fn with_registry(service: impl Into<String>, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            service: service.into(),
            registry,
        }
    }

    /// Makes each backend visible in snapshots before its first call.
    pub fn register_backends<'a>(&self, backends: impl IntoIterator<Item = &'a str>) {
        for backend in backends {
            self.registry.register_backend(backend);
        }
    }

    /// Records a call measured from `start_time` until now.
    pub fn record_call(
        &self,
        tool: &str,
        backend: Option<&str>,
        start_time: Instant,
        error: Option<ErrorCode>,
    ) {
        let latency_us = start_time.elapsed().as_micros() as u64;
        self.registry.record_dispatch(tool, backend, latency_us, error);
    }

    /// Records a finished dispatch using the latency it carries.
    pub fn record_result(&self, result: &ToolCallResult) {
        self.registry.record_dispatch(
            &result.tool_name,
            result.backend_name.as_deref(),
            result.latency_ms.saturating_mul(1000),
            result.error_code(),
        );
    }

    pub fn record_rejection(&self, code: ErrorCode) {
        self.registry.record_rejection(code);
    }

    pub fn backend(&self, backend: &str) -> Option<BackendMetrics> {
        self.registry.backend(backend)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo::new(self.service.clone(), self.registry.uptime_ms())
    }

    /// Adds the dispatch counters to `exposition`, so callers can register
    /// their own families (health gauges) on the same page.
    pub fn write_prometheus(&self, exposition: &Exposition) -> exposition::Result<()> {
        write_snapshot(exposition, &self.snapshot())
    }

    pub fn render_prometheus(&self) -> exposition::Result<String> {
        let exposition = Exposition::new();
        self.write_prometheus(&exposition)?;
        exposition.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolmesh_common::{ErrorBody, ToolOutcome};

    fn result(tool: &str, backend: Option<&str>, outcome: ToolOutcome) -> ToolCallResult {
        ToolCallResult {
            request_id: "req".into(),
            tool_name: tool.into(),
            backend_name: backend.map(str::to_string),
            latency_ms: 25,
            attempts: 1,
            outcome,
        }
    }

    #[test]
    fn test_record_result() {
        let collector = GatewayMetricsCollector::new("toolmesh");

        collector.record_result(&result(
            "transcribe",
            Some("whisper"),
            ToolOutcome::Success(json!({"text": "hello"})),
        ));
        collector.record_result(&result(
            "transcribe",
            Some("whisper"),
            ToolOutcome::Failure(ErrorBody::new(ErrorCode::UpstreamError, "boom")),
        ));
        collector.record_result(&result(
            "nope",
            None,
            ToolOutcome::Failure(ErrorBody::new(ErrorCode::UnknownTool, "Unknown tool: nope")),
        ));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.tools["transcribe"].call_count, 2);
        assert_eq!(snapshot.tools["transcribe"].avg_latency_us, 25_000);

        let whisper = collector.backend("whisper").unwrap();
        assert_eq!(whisper.success_count, 1);
        assert_eq!(whisper.error_count, 1);
        assert_eq!(whisper.last_latency_ms, Some(25));
    }

    #[test]
    fn test_clones_share_registry() {
        let collector = GatewayMetricsCollector::new("toolmesh");
        let clone = collector.clone();

        clone.record_rejection(ErrorCode::Unauthorized);
        assert_eq!(collector.snapshot().rejected_requests, 1);
    }

    #[test]
    fn test_register_backends() {
        let collector = GatewayMetricsCollector::new("toolmesh");
        collector.register_backends(["git", "memory"]);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.backends.len(), 2);
        assert_eq!(snapshot.backends["git"].error_count, 0);
    }

    #[test]
    fn test_info() {
        let info = GatewayMetricsCollector::new("mesh-a").info();
        assert_eq!(info.service, "mesh-a");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_render_prometheus() {
        let collector = GatewayMetricsCollector::new("toolmesh");
        collector.record_call("search", Some("vectors"), Instant::now(), None);

        let text = collector.render_prometheus().unwrap();
        assert!(text.contains("# TYPE toolmesh_requests_total counter"));
        assert!(text.contains("toolmesh_backend_requests_total{backend=\"vectors\",outcome=\"success\"} 1"));
    }
}
