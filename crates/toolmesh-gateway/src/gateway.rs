use std::sync::Arc;

use toolmesh_common::auth::AuthConfig;
use toolmesh_common::config::{ConfigError, GatewayConfig};
use toolmesh_common::rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
use toolmesh_common::{ToolCallRequest, ToolCallResult};
use toolmesh_metrics::GatewayMetricsCollector;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::health_monitor::{HealthCheckConfig, HealthMonitor, MonitorHandle};
use crate::registry::ServiceRegistry;
use crate::status::{LivenessReport, StatusAggregator, StatusReport, ToolListing};
use crate::upstream;

/// toolmesh coordinator.
///
/// The gateway owns the routing table, the per-backend health records, the
/// per-client rate limiter and the dispatch counters. It is a single-process
/// forwarder: every tool call resolves to exactly one backend, there is no
/// load balancing and no persisted state.
///
/// # Lifecycle
///
/// [`Gateway::new`] validates the configuration, builds the registry and
/// starts one health check task per backend. The tasks stop when the gateway
/// is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use toolmesh_gateway::Gateway;
/// use toolmesh_common::config::GatewayConfig;
/// use toolmesh_common::ToolCallRequest;
/// use serde_json::json;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = GatewayConfig::load("toolmesh.toml")?;
/// let gateway = Gateway::new(config).await?;
///
/// let result = gateway
///     .dispatch(ToolCallRequest::new("git_status", json!({"repo": "/srv/notes"})))
///     .await;
/// println!("{:?}", result.outcome);
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<ServiceRegistry>,
    monitor: HealthMonitor,
    dispatcher: Dispatcher,
    status: StatusAggregator,
    metrics: GatewayMetricsCollector,
    rate_limiter: RateLimiter,
    auth: AuthConfig,
    _monitor_handle: MonitorHandle,
}

impl Gateway {
    /// Builds the gateway and starts health monitoring.
    ///
    /// Fails on invalid configuration: duplicate tools or backends, missing
    /// backend fields, or out-of-range settings.
    pub async fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let registry = Arc::new(ServiceRegistry::from_config(&config)?);
        let client = upstream::build_client();

        let metrics = GatewayMetricsCollector::new(config.server.service_name.clone());
        metrics.register_backends(registry.backends().iter().map(|b| b.name.as_str()));

        let monitor = HealthMonitor::new(
            &registry,
            HealthCheckConfig::from(&config.health),
            client.clone(),
        );
        let monitor_handle = monitor.start(&registry);

        let dispatcher = Dispatcher::new(
            registry.clone(),
            monitor.clone(),
            metrics.clone(),
            client,
            config.dispatch.clone(),
        );
        let status = StatusAggregator::new(registry.clone(), monitor.clone(), metrics.clone());
        let rate_limiter = RateLimiter::new(RateLimitConfig::from_settings(&config.rate_limit));
        let auth = AuthConfig::from_settings(&config.auth);

        info!(
            "Gateway {} routing {} tools across {} backends (auth: {}, rate limit: {})",
            config.server.service_name,
            registry.tool_count(),
            registry.backend_count(),
            auth,
            if rate_limiter.is_enabled() {
                format!(
                    "{} per {}s",
                    config.rate_limit.requests_per_window, config.rate_limit.window_secs
                )
            } else {
                "off".to_string()
            }
        );

        Ok(Self {
            config,
            registry,
            monitor,
            dispatcher,
            status,
            metrics,
            rate_limiter,
            auth,
            _monitor_handle: monitor_handle,
        })
    }

    pub async fn dispatch(&self, request: ToolCallRequest) -> ToolCallResult {
        self.dispatcher.dispatch(request).await
    }

    pub async fn check_rate_limit(&self, client_key: &str) -> RateLimitResult {
        self.rate_limiter.check_rate_limit(client_key).await
    }

    pub fn authorize(&self, token: Option<&str>) -> bool {
        self.auth.validate_token(token)
    }

    /// The token rate limiting may key on: `Some` only for a token that
    /// auth accepts. With auth disabled every caller is keyed by address.
    pub fn rate_limit_token<'a>(&self, token: Option<&'a str>) -> Option<&'a str> {
        token.filter(|&t| self.auth.requires_auth() && self.auth.validate_token(Some(t)))
    }

    pub fn liveness(&self) -> LivenessReport {
        self.status.liveness()
    }

    pub async fn status(&self) -> StatusReport {
        self.status.status().await
    }

    pub async fn render_metrics(&self) -> toolmesh_common::Result<String> {
        self.status.render_metrics().await
    }

    pub fn tools(&self) -> ToolListing<'_> {
        self.status.tools()
    }

    pub fn service_name(&self) -> &str {
        &self.config.server.service_name
    }

    pub fn max_body_bytes(&self) -> usize {
        self.config.server.max_body_bytes
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn metrics(&self) -> &GatewayMetricsCollector {
        &self.metrics
    }
}
