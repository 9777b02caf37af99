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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coordinator identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    pub service: String,
    pub version: String,
    pub uptime_ms: u64,
}

impl ServerInfo {
    pub fn new(service: impl Into<String>, uptime_ms: u64) -> Self {
        Self {
            service: service.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms,
        }
    }
}

/// Metrics for a single tool
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolMetrics {
    pub backend: String,
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_us: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
}

/// Rolling dispatch counters for a single backend
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendMetrics {
    pub success_count: u64,
    pub error_count: u64,
    pub last_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors_by_code: BTreeMap<String, u64>,
}

/// Complete metrics snapshot
///
/// Maps are ordered so `/metrics` output is stable between scrapes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Every request that reached the coordinator's call endpoint
    pub total_requests: u64,
    pub successful_requests: u64,
    /// Dispatches that ended in an error envelope
    pub failed_requests: u64,
    /// Requests refused before dispatch (rate limit, auth, bad envelope)
    pub rejected_requests: u64,
    pub uptime_ms: u64,
    pub errors_by_code: BTreeMap<String, u64>,
    pub tools: BTreeMap<String, ToolMetrics>,
    pub backends: BTreeMap<String, BackendMetrics>,
}
