//! toolmesh Metrics Collection
//!
//! Thread-safe counters for the coordinator: per-request outcomes, per-error
//! code totals, per-tool latency percentiles and the rolling per-backend
//! success/error counts shown by `/status`.
//!
//! # Architecture
//!
//! - [`MetricsRegistry`]: lock-free counters plus small `RwLock`ed maps keyed
//!   by tool and backend
//! - [`GatewayMetricsCollector`]: cheap-to-clone handle the dispatcher and
//!   HTTP layer record into
//! - [`MetricsSnapshot`]: serializable point-in-time copy
//! - [`exposition`]: Prometheus text exposition for `GET /metrics`
//!
//! # Usage Example
//!
//! ```rust
//! use toolmesh_metrics::GatewayMetricsCollector;
//! use std::time::Instant;
//!
//! let collector = GatewayMetricsCollector::new("toolmesh");
//!
//! let start = Instant::now();
//! // ... forward the call ...
//! collector.record_call("git_status", Some("git"), start, None);
//!
//! let page = collector.render_prometheus().unwrap();
//! assert!(page.contains("toolmesh_requests_total"));
//! ```

mod collector;
pub mod exposition;
mod registry;
mod snapshot;

pub use collector::GatewayMetricsCollector;
pub use exposition::Exposition;
pub use registry::MetricsRegistry;
pub use snapshot::{BackendMetrics, MetricsSnapshot, ServerInfo, ToolMetrics};
