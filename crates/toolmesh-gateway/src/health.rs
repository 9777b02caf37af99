//! Per-backend health records and the transitions between health states.
//!
//! Everything here is synchronous and clock-free apart from the timestamps
//! stamped on the record; the monitor owns the locking and the I/O.
//!
//! ```text
//!            success               failure (< threshold)
//! unknown ───────────▶ healthy ─────────────────────────▶ degraded
//!    │                  ▲  ▲                                  │
//!    │                  │  └──────── success ─────────────────┘
//!    │ failures ≥ N     │ recovery_threshold successes        │ failures ≥ N
//!    └──────────────▶ unhealthy ◀─────────────────────────────┘
//! ```
//!
//! A successful check slower than `degraded_latency` reports `degraded`
//! instead of `healthy`.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use toolmesh_common::config::HealthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No check has completed yet
    Unknown,
    Healthy,
    /// Answering, but slow or with recent failures below the threshold
    Degraded,
    /// Circuit open: calls fail fast without touching the network
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Whether the dispatcher may send traffic.
    pub fn accepts_traffic(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }

    /// Whether the backend counts as connected in the status summary.
    pub fn is_connected(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Debounce and latency limits for the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Consecutive failures before a backend becomes `unhealthy`
    pub failure_threshold: u32,
    /// Consecutive successful checks needed to leave `unhealthy`
    pub recovery_threshold: u32,
    /// Successful checks slower than this report `degraded`
    pub degraded_latency: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 2,
            degraded_latency: Duration::from_millis(1000),
        }
    }
}

impl From<&HealthConfig> for HealthThresholds {
    fn from(config: &HealthConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_threshold: config.recovery_threshold.max(1),
            degraded_latency: config.degraded_latency(),
        }
    }
}

/// A status change produced by applying an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub backend_name: String,
    pub status: HealthStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_error: Option<String>,
    pub last_changed_at: DateTime<Utc>,
}

impl HealthRecord {
    pub fn new(backend_name: impl Into<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            status: HealthStatus::Unknown,
            last_checked_at: None,
            last_latency_ms: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_error: None,
            last_changed_at: Utc::now(),
        }
    }

    /// Applies a successful health check.
    pub fn on_check_success(
        &mut self,
        latency: Duration,
        thresholds: &HealthThresholds,
    ) -> Option<Transition> {
        self.last_checked_at = Some(Utc::now());
        self.last_latency_ms = Some(latency.as_millis() as u64);
        self.consecutive_failures = 0;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.last_error = None;

        let next = if self.status == HealthStatus::Unhealthy
            && self.consecutive_successes < thresholds.recovery_threshold
        {
            HealthStatus::Unhealthy
        } else if latency > thresholds.degraded_latency {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        self.set_status(next)
    }

    /// Applies a failed or timed-out health check. `latency` is how long the
    /// attempt took before failing.
    pub fn on_check_failure(
        &mut self,
        latency: Duration,
        error: impl Into<String>,
        thresholds: &HealthThresholds,
    ) -> Option<Transition> {
        self.last_checked_at = Some(Utc::now());
        self.last_latency_ms = Some(latency.as_millis() as u64);
        self.record_failure(error.into(), thresholds)
    }

    /// Applies a successful dispatch. Never reopens a tripped circuit.
    pub fn on_dispatch_success(&mut self) -> Option<Transition> {
        self.consecutive_failures = 0;
        self.last_error = None;
        match self.status {
            HealthStatus::Degraded => self.set_status(HealthStatus::Healthy),
            _ => None,
        }
    }

    /// Applies a dispatch that timed out or failed at the transport level.
    pub fn on_dispatch_failure(
        &mut self,
        error: impl Into<String>,
        thresholds: &HealthThresholds,
    ) -> Option<Transition> {
        self.record_failure(error.into(), thresholds)
    }

    fn record_failure(&mut self, error: String, thresholds: &HealthThresholds) -> Option<Transition> {
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);

        let next = if self.consecutive_failures >= thresholds.failure_threshold {
            HealthStatus::Unhealthy
        } else {
            match self.status {
                HealthStatus::Healthy => HealthStatus::Degraded,
                other => other,
            }
        };
        self.set_status(next)
    }

    fn set_status(&mut self, next: HealthStatus) -> Option<Transition> {
        if next == self.status {
            return None;
        }
        let transition = Transition {
            from: self.status,
            to: next,
        };
        self.status = next;
        self.last_changed_at = Utc::now();
        Some(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Duration = Duration::from_millis(20);
    const SLOW: Duration = Duration::from_millis(1500);

    fn thresholds() -> HealthThresholds {
        HealthThresholds::default()
    }

    #[test]
    fn test_new_record_is_unknown() {
        let record = HealthRecord::new("memory");
        assert_eq!(record.status, HealthStatus::Unknown);
        assert!(record.status.accepts_traffic());
        assert!(!record.status.is_connected());
        assert!(record.last_checked_at.is_none());
    }

    #[test]
    fn test_first_success_is_healthy() {
        let mut record = HealthRecord::new("memory");
        let transition = record.on_check_success(FAST, &thresholds()).unwrap();

        assert_eq!(transition.from, HealthStatus::Unknown);
        assert_eq!(transition.to, HealthStatus::Healthy);
        assert_eq!(record.last_latency_ms, Some(20));
        assert!(record.last_checked_at.is_some());
    }

    #[test]
    fn test_slow_success_is_degraded() {
        let mut record = HealthRecord::new("memory");
        record.on_check_success(SLOW, &thresholds());
        assert_eq!(record.status, HealthStatus::Degraded);

        record.on_check_success(FAST, &thresholds());
        assert_eq!(record.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_unhealthy_after_threshold() {
        let mut record = HealthRecord::new("memory");
        record.on_check_success(FAST, &thresholds());

        record.on_check_failure(FAST, "connection refused", &thresholds());
        assert_eq!(record.status, HealthStatus::Degraded);
        record.on_check_failure(FAST, "connection refused", &thresholds());
        assert_eq!(record.status, HealthStatus::Degraded);
        let transition = record.on_check_failure(FAST, "connection refused", &thresholds());

        assert_eq!(record.status, HealthStatus::Unhealthy);
        assert_eq!(transition.unwrap().from, HealthStatus::Degraded);
        assert_eq!(record.consecutive_failures, 3);
        assert_eq!(record.last_error.as_deref(), Some("connection refused"));
        assert!(!record.status.accepts_traffic());
    }

    #[test]
    fn test_unknown_stays_unknown_below_threshold() {
        let mut record = HealthRecord::new("memory");
        assert!(record.on_check_failure(FAST, "refused", &thresholds()).is_none());
        record.on_check_failure(FAST, "refused", &thresholds());
        assert_eq!(record.status, HealthStatus::Unknown);

        record.on_check_failure(FAST, "refused", &thresholds());
        assert_eq!(record.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_success_resets_failures() {
        let mut record = HealthRecord::new("memory");
        record.on_check_failure(FAST, "refused", &thresholds());
        record.on_check_failure(FAST, "refused", &thresholds());
        record.on_check_success(FAST, &thresholds());
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.last_error.is_none());

        // The counter starts over, so two more failures are not enough.
        record.on_check_failure(FAST, "refused", &thresholds());
        record.on_check_failure(FAST, "refused", &thresholds());
        assert_ne!(record.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_recovery_needs_consecutive_successes() {
        let mut record = HealthRecord::new("memory");
        for _ in 0..3 {
            record.on_check_failure(FAST, "refused", &thresholds());
        }
        assert_eq!(record.status, HealthStatus::Unhealthy);

        assert!(record.on_check_success(FAST, &thresholds()).is_none());
        assert_eq!(record.status, HealthStatus::Unhealthy);
        assert_eq!(record.consecutive_failures, 0);

        let transition = record.on_check_success(FAST, &thresholds()).unwrap();
        assert_eq!(transition.from, HealthStatus::Unhealthy);
        assert_eq!(transition.to, HealthStatus::Healthy);
    }

    #[test]
    fn test_recovery_interrupted_by_failure() {
        let mut record = HealthRecord::new("memory");
        for _ in 0..3 {
            record.on_check_failure(FAST, "refused", &thresholds());
        }
        record.on_check_success(FAST, &thresholds());
        record.on_check_failure(FAST, "refused", &thresholds());
        record.on_check_success(FAST, &thresholds());
        assert_eq!(record.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_recovery_threshold_of_one() {
        let thresholds = HealthThresholds {
            recovery_threshold: 1,
            ..HealthThresholds::default()
        };
        let mut record = HealthRecord::new("memory");
        for _ in 0..3 {
            record.on_check_failure(FAST, "refused", &thresholds);
        }
        record.on_check_success(FAST, &thresholds);
        assert_eq!(record.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_dispatch_success_promotes_degraded_only() {
        let mut record = HealthRecord::new("memory");
        record.on_check_success(FAST, &thresholds());
        record.on_dispatch_failure("timeout", &thresholds());
        assert_eq!(record.status, HealthStatus::Degraded);

        let transition = record.on_dispatch_success().unwrap();
        assert_eq!(transition.to, HealthStatus::Healthy);
        assert_eq!(record.consecutive_failures, 0);

        let mut tripped = HealthRecord::new("git");
        for _ in 0..3 {
            tripped.on_dispatch_failure("refused", &thresholds());
        }
        assert!(tripped.on_dispatch_success().is_none());
        assert_eq!(tripped.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_dispatch_failures_trip_circuit() {
        let mut record = HealthRecord::new("memory");
        record.on_check_success(FAST, &thresholds());
        for _ in 0..3 {
            record.on_dispatch_failure("timed out", &thresholds());
        }
        assert_eq!(record.status, HealthStatus::Unhealthy);
        // Dispatch outcomes do not count as checks.
        assert_eq!(record.last_latency_ms, Some(20));
    }

    #[test]
    fn test_thresholds_from_config() {
        let config = HealthConfig {
            failure_threshold: 5,
            recovery_threshold: 0,
            degraded_latency_ms: 250,
            ..HealthConfig::default()
        };
        let thresholds = HealthThresholds::from(&config);
        assert_eq!(thresholds.failure_threshold, 5);
        assert_eq!(thresholds.recovery_threshold, 1);
        assert_eq!(thresholds.degraded_latency, Duration::from_millis(250));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(HealthStatus::Unhealthy).unwrap(), "unhealthy");
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
    }
}
