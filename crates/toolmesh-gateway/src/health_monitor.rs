//! Background health checking.
//!
//! # Architecture
//!
//! The monitor owns one [`HealthRecord`] per backend, each behind its own
//! `tokio::sync::RwLock`. The map of records is built at startup and never
//! changes, so readers only ever contend on the record they look at.
//!
//! [`HealthMonitor::start`] spawns one task per backend. Each task ticks on a
//! fixed interval, issues `GET base_url + health_check_path` under a short
//! timeout and applies the outcome. A failed check is just another
//! observation; it never ends the loop. The returned [`MonitorHandle`] aborts
//! every task when dropped.
//!
//! The dispatcher reports call outcomes through
//! [`record_dispatch_success`](HealthMonitor::record_dispatch_success) and
//! [`record_dispatch_failure`](HealthMonitor::record_dispatch_failure) so a
//! backend that dies between checks trips its circuit without waiting for the
//! next tick.
//!
//! With checking disabled no tasks run, records stay `unknown`, and dispatch
//! feedback is ignored so a backend can never get stuck open with nothing to
//! close it again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use toolmesh_common::config::HealthConfig;
use toolmesh_common::GatewayError;
use tracing::{debug, info, warn};

use crate::health::{HealthRecord, HealthStatus, HealthThresholds, Transition};
use crate::registry::{BackendDescriptor, ServiceRegistry};
use crate::upstream::{self, HttpClient};

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub thresholds: HealthThresholds,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15),
            timeout: Duration::from_millis(3000),
            thresholds: HealthThresholds::default(),
        }
    }
}

impl From<&HealthConfig> for HealthCheckConfig {
    fn from(config: &HealthConfig) -> Self {
        Self {
            enabled: config.enabled,
            interval: config.interval(),
            timeout: config.timeout(),
            thresholds: HealthThresholds::from(config),
        }
    }
}

/// Outcome of a single probe, before it is applied to a record.
#[derive(Debug)]
pub struct CheckOutcome {
    pub latency: Duration,
    pub result: Result<(), String>,
}

#[derive(Clone)]
pub struct HealthMonitor {
    records: Arc<HashMap<String, Arc<RwLock<HealthRecord>>>>,
    config: Arc<HealthCheckConfig>,
    client: HttpClient,
}

impl HealthMonitor {
    pub fn new(registry: &ServiceRegistry, config: HealthCheckConfig, client: HttpClient) -> Self {
        let records = registry
            .backends()
            .iter()
            .map(|backend| {
                (
                    backend.name.clone(),
                    Arc::new(RwLock::new(HealthRecord::new(&backend.name))),
                )
            })
            .collect();

        Self {
            records: Arc::new(records),
            config: Arc::new(config),
            client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Spawns one polling task per backend.
    pub fn start(&self, registry: &ServiceRegistry) -> MonitorHandle {
        if !self.config.enabled {
            info!("Health checking disabled, all backends stay unknown");
            return MonitorHandle { tasks: Vec::new() };
        }

        let tasks = registry
            .backends()
            .iter()
            .cloned()
            .map(|backend| {
                let monitor = self.clone();
                tokio::spawn(async move { monitor.run(backend).await })
            })
            .collect::<Vec<_>>();

        info!(
            "Health monitor started for {} backends (interval {:?}, timeout {:?})",
            tasks.len(),
            self.config.interval,
            self.config.timeout
        );
        MonitorHandle { tasks }
    }

    async fn run(self, backend: BackendDescriptor) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.check_backend(&backend).await;
        }
    }

    /// Probes one backend and applies the result.
    pub async fn check_backend(&self, backend: &BackendDescriptor) -> Option<Transition> {
        let outcome = self.probe(backend).await;
        self.apply_check(&backend.name, outcome).await
    }

    async fn probe(&self, backend: &BackendDescriptor) -> CheckOutcome {
        let url = backend.health_url();
        let start = Instant::now();
        let response =
            tokio::time::timeout(self.config.timeout, upstream::get(&self.client, &backend.name, &url))
                .await;
        let latency = start.elapsed();

        let result = match response {
            Err(_) => Err(format!(
                "health check timed out after {}ms",
                self.config.timeout.as_millis()
            )),
            Ok(Err(e)) => Err(e.to_string()),
            Ok(Ok(response)) if response.status.is_success() => Ok(()),
            Ok(Ok(response)) => Err(format!("health check returned HTTP {}", response.status)),
        };

        CheckOutcome { latency, result }
    }

    /// Applies a probe outcome to the backend's record.
    pub async fn apply_check(&self, backend: &str, outcome: CheckOutcome) -> Option<Transition> {
        let record = self.records.get(backend)?;
        let thresholds = &self.config.thresholds;

        let (transition, snapshot) = {
            let mut record = record.write().await;
            let transition = match outcome.result {
                Ok(()) => record.on_check_success(outcome.latency, thresholds),
                Err(error) => {
                    debug!("Health check for {} failed: {}", backend, error);
                    record.on_check_failure(outcome.latency, error, thresholds)
                }
            };
            (transition, record.clone())
        };

        if let Some(transition) = transition {
            log_transition(&snapshot, transition, "health check");
        }
        transition
    }

    /// Feeds a successful dispatch back into the record.
    pub async fn record_dispatch_success(&self, backend: &str) {
        if !self.config.enabled {
            return;
        }
        let Some(record) = self.records.get(backend) else {
            return;
        };

        // Skip the write lock on the hot path when there is nothing to reset.
        {
            let current = record.read().await;
            if current.consecutive_failures == 0 && current.status != HealthStatus::Degraded {
                return;
            }
        }

        let (transition, snapshot) = {
            let mut record = record.write().await;
            (record.on_dispatch_success(), record.clone())
        };
        if let Some(transition) = transition {
            log_transition(&snapshot, transition, "successful call");
        }
    }

    /// Feeds a backend-level dispatch failure back into the record.
    pub async fn record_dispatch_failure(&self, backend: &str, error: &GatewayError) {
        if !self.config.enabled || !error.is_backend_failure() {
            return;
        }
        let Some(record) = self.records.get(backend) else {
            return;
        };

        let (transition, snapshot) = {
            let mut record = record.write().await;
            (
                record.on_dispatch_failure(error.to_string(), &self.config.thresholds),
                record.clone(),
            )
        };
        if let Some(transition) = transition {
            log_transition(&snapshot, transition, "failed call");
        }
    }

    /// Copy of a backend's record.
    pub async fn record(&self, backend: &str) -> Option<HealthRecord> {
        match self.records.get(backend) {
            Some(record) => Some(record.read().await.clone()),
            None => None,
        }
    }

    /// Copies of every record, in the order given by `registry`.
    pub async fn records(&self, registry: &ServiceRegistry) -> Vec<HealthRecord> {
        let mut records = Vec::with_capacity(registry.backend_count());
        for backend in registry.backends() {
            if let Some(record) = self.record(&backend.name).await {
                records.push(record);
            }
        }
        records
    }
}

fn log_transition(record: &HealthRecord, transition: Transition, cause: &str) {
    match transition.to {
        HealthStatus::Unhealthy => warn!(
            "Backend {} marked unhealthy after {} consecutive failures ({}): {}",
            record.backend_name,
            record.consecutive_failures,
            cause,
            record.last_error.as_deref().unwrap_or("unknown error")
        ),
        HealthStatus::Degraded => warn!(
            "Backend {} degraded ({} -> degraded, {})",
            record.backend_name, transition.from, cause
        ),
        _ => info!(
            "Backend {} is now {} (was {}, {})",
            record.backend_name, transition.to, transition.from, cause
        ),
    }
}

/// Owns the polling tasks; aborts them when dropped.
#[derive(Debug)]
pub struct MonitorHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicBool, Ordering};
    use toolmesh_common::config::GatewayConfig;

    fn registry_for(base_url: &str) -> ServiceRegistry {
        let config: GatewayConfig = toml::from_str(&format!(
            r#"
[[backends]]
name = "memory"
base_url = "{base_url}"
tools = ["store_memory"]
"#
        ))
        .unwrap();
        ServiceRegistry::from_config(&config).unwrap()
    }

    fn fast_config() -> HealthCheckConfig {
        HealthCheckConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(200),
            ..HealthCheckConfig::default()
        }
    }

    /// Health endpoint whose answer can be flipped at runtime.
    async fn spawn_backend(up: Arc<AtomicBool>) -> String {
        let app = Router::new().route(
            "/health",
            get(move || {
                let up = up.clone();
                async move {
                    if up.load(Ordering::SeqCst) {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    fn failure() -> CheckOutcome {
        CheckOutcome {
            latency: Duration::from_millis(5),
            result: Err("connection refused".into()),
        }
    }

    fn success() -> CheckOutcome {
        CheckOutcome {
            latency: Duration::from_millis(5),
            result: Ok(()),
        }
    }

    #[test]
    fn test_config_from_settings() {
        let config = HealthCheckConfig::from(&HealthConfig::default());
        assert!(config.enabled);
        assert_eq!(config.interval, Duration::from_secs(15));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.thresholds.failure_threshold, 3);
    }

    #[tokio::test]
    async fn test_records_start_unknown() {
        let registry = registry_for("http://127.0.0.1:1");
        let monitor = HealthMonitor::new(&registry, fast_config(), upstream::build_client());

        let record = monitor.record("memory").await.unwrap();
        assert_eq!(record.status, HealthStatus::Unknown);
        assert!(monitor.record("nope").await.is_none());
        assert_eq!(monitor.records(&registry).await.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_check_threshold() {
        let registry = registry_for("http://127.0.0.1:1");
        let monitor = HealthMonitor::new(&registry, fast_config(), upstream::build_client());

        monitor.apply_check("memory", success()).await;
        monitor.apply_check("memory", failure()).await;
        monitor.apply_check("memory", failure()).await;
        let transition = monitor.apply_check("memory", failure()).await.unwrap();

        assert_eq!(transition.to, HealthStatus::Unhealthy);
        let record = monitor.record("memory").await.unwrap();
        assert_eq!(record.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_check_against_live_backend() {
        let up = Arc::new(AtomicBool::new(true));
        let base_url = spawn_backend(up.clone()).await;
        let registry = registry_for(&base_url);
        let monitor = HealthMonitor::new(&registry, fast_config(), upstream::build_client());
        let backend = registry.backend("memory").unwrap().clone();

        monitor.check_backend(&backend).await;
        assert_eq!(monitor.record("memory").await.unwrap().status, HealthStatus::Healthy);

        up.store(false, Ordering::SeqCst);
        for _ in 0..3 {
            monitor.check_backend(&backend).await;
        }
        let record = monitor.record("memory").await.unwrap();
        assert_eq!(record.status, HealthStatus::Unhealthy);
        assert!(record.last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_check() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let registry = registry_for(&format!("http://{}", addr));
        let monitor = HealthMonitor::new(&registry, fast_config(), upstream::build_client());
        let backend = registry.backend("memory").unwrap().clone();

        monitor.check_backend(&backend).await;
        let record = monitor.record("memory").await.unwrap();
        assert_eq!(record.consecutive_failures, 1);
        assert!(record.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_background_tasks_recover_backend() {
        let up = Arc::new(AtomicBool::new(false));
        let base_url = spawn_backend(up.clone()).await;
        let registry = registry_for(&base_url);
        let monitor = HealthMonitor::new(&registry, fast_config(), upstream::build_client());

        let handle = monitor.start(&registry);
        assert_eq!(handle.task_count(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(monitor.record("memory").await.unwrap().status, HealthStatus::Unhealthy);

        up.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(monitor.record("memory").await.unwrap().status, HealthStatus::Healthy);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_checks() {
        let up = Arc::new(AtomicBool::new(true));
        let base_url = spawn_backend(up.clone()).await;
        let registry = registry_for(&base_url);
        let monitor = HealthMonitor::new(&registry, fast_config(), upstream::build_client());

        let handle = monitor.start(&registry);
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let before = monitor.record("memory").await.unwrap().last_checked_at;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let after = monitor.record("memory").await.unwrap().last_checked_at;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_dispatch_feedback() {
        let registry = registry_for("http://127.0.0.1:1");
        let monitor = HealthMonitor::new(&registry, fast_config(), upstream::build_client());
        monitor.apply_check("memory", success()).await;

        let timeout = GatewayError::UpstreamTimeout {
            backend: "memory".into(),
            timeout_ms: 100,
        };
        monitor.record_dispatch_failure("memory", &timeout).await;
        assert_eq!(monitor.record("memory").await.unwrap().status, HealthStatus::Degraded);

        // Application-level failures say nothing about liveness.
        let tool_failed = GatewayError::ToolFailed {
            backend: "memory".into(),
            message: "bad input".into(),
        };
        monitor.record_dispatch_failure("memory", &tool_failed).await;
        assert_eq!(monitor.record("memory").await.unwrap().consecutive_failures, 1);

        monitor.record_dispatch_success("memory").await;
        let record = monitor.record("memory").await.unwrap();
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(record.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_disabled_monitor_ignores_feedback() {
        let registry = registry_for("http://127.0.0.1:1");
        let config = HealthCheckConfig {
            enabled: false,
            ..fast_config()
        };
        let monitor = HealthMonitor::new(&registry, config, upstream::build_client());

        let handle = monitor.start(&registry);
        assert_eq!(handle.task_count(), 0);

        let refused = GatewayError::Transport {
            backend: "memory".into(),
            message: "refused".into(),
        };
        for _ in 0..5 {
            monitor.record_dispatch_failure("memory", &refused).await;
        }
        assert_eq!(monitor.record("memory").await.unwrap().status, HealthStatus::Unknown);
    }
}
