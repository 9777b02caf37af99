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

use crate::snapshot::{BackendMetrics, MetricsSnapshot, ToolMetrics};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Instant;
use toolmesh_common::ErrorCode;

const NUM_HISTOGRAM_BINS: usize = 100;
const NUM_ERROR_CODES: usize = ErrorCode::ALL.len();

/// Marker stored in `last_latency_ms` before the first sample.
const NO_LATENCY: u64 = u64::MAX;

/// Logarithmic latency histogram.
///
/// Each decade (1-10μs, 10-100μs, ...) is split into 10 bins keyed by the
/// leading digit, so bin `d * 10 + k` holds samples in
/// `[k * 10^d, (k + 1) * 10^d)`. Ten decades cover up to 10^10μs; anything
/// slower lands in the last bin.
///
/// Recording is a single relaxed `fetch_add`; percentiles are estimated with
/// a linear scan and interpolation inside the matching bin.
#[derive(Debug)]
struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency_us: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency_us: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_us: u64) {
        self.bins[Self::latency_to_bin(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    fn latency_to_bin(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = latency_us.ilog10();
        let leading_digit = latency_us / 10u64.pow(decade);
        let bin = decade as usize * 10 + leading_digit as usize;
        bin.min(NUM_HISTOGRAM_BINS - 1)
    }

    /// Lower and upper latency bound of a bin.
    fn bin_bounds(bin: usize) -> (u64, u64) {
        let decade = (bin / 10) as u32;
        let digit = (bin % 10) as u64;
        let scale = 10u64.pow(decade);
        if digit == 0 {
            // Only bin 0 has a zero leading digit.
            (0, 1)
        } else {
            (digit * scale, (digit + 1) * scale)
        }
    }

    fn estimate_percentile(&self, percentile: u64) -> u64 {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }

        let target = ((total * percentile).div_ceil(100)).max(1);
        let mut cumulative = 0;

        for (bin_idx, bin) in self.bins.iter().enumerate() {
            let count = bin.load(Ordering::Relaxed);
            if count > 0 && cumulative + count >= target {
                let (low, high) = Self::bin_bounds(bin_idx);
                let fraction = (target - cumulative) as f64 / count as f64;
                return low + (fraction * (high - low) as f64) as u64;
            }
            cumulative += count;
        }

        Self::bin_bounds(NUM_HISTOGRAM_BINS - 1).1
    }

    /// `(avg, p50, p95, p99)` in microseconds, all zero when empty.
    fn calculate_percentiles(&self) -> (u64, u64, u64, u64) {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return (0, 0, 0, 0);
        }
        let avg = self.total_latency_us.load(Ordering::Relaxed) / total;
        (
            avg,
            self.estimate_percentile(50),
            self.estimate_percentile(95),
            self.estimate_percentile(99),
        )
    }
}

/// Per-tool dispatch statistics.
#[derive(Debug)]
struct ToolStats {
    backend: String,
    call_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    latencies: LatencyHistogram,
}

impl ToolStats {
    fn new(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            call_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
        }
    }

    fn snapshot(&self) -> ToolMetrics {
        let (avg, p50, p95, p99) = self.latencies.calculate_percentiles();
        ToolMetrics {
            backend: self.backend.clone(),
            call_count: self.call_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            avg_latency_us: avg,
            p50_latency_us: p50,
            p95_latency_us: p95,
            p99_latency_us: p99,
        }
    }
}

/// Per-backend rolling counters reported by `/status`.
#[derive(Debug)]
struct BackendStats {
    success_count: AtomicU64,
    error_count: AtomicU64,
    last_latency_ms: AtomicU64,
    errors_by_code: [AtomicU64; NUM_ERROR_CODES],
}

impl BackendStats {
    fn new() -> Self {
        Self {
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(NO_LATENCY),
            errors_by_code: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn record(&self, latency_ms: u64, error: Option<ErrorCode>) {
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
        match error {
            None => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
            }
            Some(code) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                self.errors_by_code[code.index()].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> BackendMetrics {
        let last_latency_ms = match self.last_latency_ms.load(Ordering::Relaxed) {
            NO_LATENCY => None,
            ms => Some(ms),
        };
        BackendMetrics {
            success_count: self.success_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_latency_ms,
            errors_by_code: collect_codes(&self.errors_by_code),
        }
    }
}

fn collect_codes(counters: &[AtomicU64; NUM_ERROR_CODES]) -> BTreeMap<String, u64> {
    ErrorCode::ALL
        .iter()
        .filter_map(|code| {
            let count = counters[code.index()].load(Ordering::Relaxed);
            (count > 0).then(|| (code.as_str().to_string(), count))
        })
        .collect()
}

/// Thread-safe store for every counter the coordinator exposes.
///
/// Counter updates are lock-free; the tool and backend maps are behind
/// `RwLock`s that are held only long enough to fetch or insert an entry.
///
/// Per-tool entries are only created for tools that resolved to a backend,
/// so the map is bounded by the routing table no matter what clients send.
///
/// # Example
///
/// ```rust
/// use toolmesh_metrics::MetricsRegistry;
/// use toolmesh_common::ErrorCode;
///
/// let registry = MetricsRegistry::new();
/// registry.record_dispatch("store_memory", Some("memory"), 1_500, None);
/// registry.record_dispatch("nope", None, 20, Some(ErrorCode::UnknownTool));
///
/// let snapshot = registry.snapshot();
/// assert_eq!(snapshot.total_requests, 2);
/// assert_eq!(snapshot.failed_requests, 1);
/// ```
#[derive(Debug)]
pub struct MetricsRegistry {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    rejected_requests: AtomicU64,
    errors_by_code: [AtomicU64; NUM_ERROR_CODES],
    tools: StdRwLock<HashMap<String, Arc<ToolStats>>>,
    backends: StdRwLock<HashMap<String, Arc<BackendStats>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            errors_by_code: std::array::from_fn(|_| AtomicU64::new(0)),
            tools: StdRwLock::new(HashMap::new()),
            backends: StdRwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Pre-registers a backend so it shows up with zero counts before its
    /// first call.
    pub fn register_backend(&self, backend: &str) {
        self.backend_stats(backend);
    }

    /// Records one dispatcher outcome.
    ///
    /// # Arguments
    /// * `tool` - Requested tool name
    /// * `backend` - Backend it resolved to, `None` for unknown tools
    /// * `latency_us` - Time spent in the dispatcher
    /// * `error` - Error code for failed calls, `None` on success
    pub fn record_dispatch(
        &self,
        tool: &str,
        backend: Option<&str>,
        latency_us: u64,
        error: Option<ErrorCode>,
    ) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match error {
            None => {
                self.successful_requests.fetch_add(1, Ordering::Relaxed);
            }
            Some(code) => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
                self.errors_by_code[code.index()].fetch_add(1, Ordering::Relaxed);
            }
        }

        let Some(backend) = backend else {
            return;
        };

        let tool_stats = self.tool_stats(tool, backend);
        tool_stats.call_count.fetch_add(1, Ordering::Relaxed);
        tool_stats.latencies.record(latency_us);
        if error.is_none() {
            tool_stats.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            tool_stats.failure_count.fetch_add(1, Ordering::Relaxed);
        }

        self.backend_stats(backend).record(latency_us / 1000, error);
    }

    /// Records a request turned away before dispatch (rate limit, auth,
    /// malformed envelope).
    pub fn record_rejection(&self, code: ErrorCode) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
        self.errors_by_code[code.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Counters for a single backend, if it has been seen.
    pub fn backend(&self, backend: &str) -> Option<BackendMetrics> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        backends.get(backend).map(|stats| stats.snapshot())
    }

    /// Best-effort point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tools = {
            let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
            tools
                .iter()
                .map(|(name, stats)| (name.clone(), stats.snapshot()))
                .collect()
        };
        let backends = {
            let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
            backends
                .iter()
                .map(|(name, stats)| (name.clone(), stats.snapshot()))
                .collect()
        };

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            uptime_ms: self.uptime_ms(),
            errors_by_code: collect_codes(&self.errors_by_code),
            tools,
            backends,
        }
    }

    fn tool_stats(&self, tool: &str, backend: &str) -> Arc<ToolStats> {
        if let Some(stats) = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool)
        {
            return stats.clone();
        }
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        tools
            .entry(tool.to_string())
            .or_insert_with(|| Arc::new(ToolStats::new(backend)))
            .clone()
    }

    fn backend_stats(&self, backend: &str) -> Arc<BackendStats> {
        if let Some(stats) = self
            .backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(backend)
        {
            return stats.clone();
        }
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        backends
            .entry(backend.to_string())
            .or_insert_with(|| Arc::new(BackendStats::new()))
            .clone()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
