//! Request dispatcher: resolve, circuit-check, forward, translate.
//!
//! # Call flow
//!
//! 1. Resolve the tool in the [`ServiceRegistry`]; unknown tools fail with
//!    `UNKNOWN_TOOL` before any network I/O
//! 2. Ask [`policy::admit`] about the backend's current health; an open
//!    circuit fails with `BACKEND_UNAVAILABLE`
//! 3. POST `{"tool", "arguments"}` to the backend under a single deadline
//!    (tool timeout, else backend timeout, else the global default)
//! 4. On failure, report to the health monitor and ask
//!    [`policy::should_retry`] whether to try once more
//!
//! The deadline covers every attempt and the backoff between them, so a call
//! never outlives its timeout. Dropping the future returned by
//! [`Dispatcher::dispatch`] (client disconnect) drops the in-flight backend
//! request with it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use toolmesh_common::config::DispatchConfig;
use toolmesh_common::{
    BackendReply, ErrorBody, ErrorCode, GatewayError, Result, ToolCallRequest, ToolCallResult,
    ToolOutcome,
};
use toolmesh_metrics::GatewayMetricsCollector;
use tracing::{debug, error, warn};

use crate::health::HealthStatus;
use crate::health_monitor::HealthMonitor;
use crate::policy::{self, Admission, RetryContext, RetryDecision};
use crate::registry::{BackendDescriptor, ServiceRegistry, ToolSpec};
use crate::upstream::{self, HttpClient};

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    monitor: HealthMonitor,
    metrics: GatewayMetricsCollector,
    client: HttpClient,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        monitor: HealthMonitor,
        metrics: GatewayMetricsCollector,
        client: HttpClient,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            monitor,
            metrics,
            client,
            config,
        }
    }

    /// Time budget for one call to `tool`.
    pub fn timeout_for(&self, tool: &ToolSpec, backend: &BackendDescriptor) -> Duration {
        tool.timeout
            .or(backend.timeout)
            .unwrap_or_else(|| self.config.default_timeout())
    }

    /// Runs one tool call to completion. Never fails: every error is folded
    /// into the returned result.
    pub async fn dispatch(&self, request: ToolCallRequest) -> ToolCallResult {
        let start = Instant::now();
        let mut attempts = 0;

        let (backend_name, outcome) = match self.route(&request.tool_name) {
            Ok((tool, backend)) => {
                let outcome = self.call_backend(&request, tool, backend, &mut attempts).await;
                (Some(backend.name.clone()), outcome)
            }
            Err(e) => {
                debug!("Rejecting call {}: {}", request.request_id, e);
                (None, Err(e))
            }
        };

        let outcome = match outcome {
            Ok(value) => ToolOutcome::Success(value),
            Err(e) => {
                if e.code() == ErrorCode::Internal {
                    error!(
                        "Internal error dispatching {} ({}): {}",
                        request.tool_name, request.request_id, e
                    );
                }
                ToolOutcome::Failure(ErrorBody::from_error(&e))
            }
        };

        let result = ToolCallResult {
            request_id: request.request_id,
            tool_name: request.tool_name,
            backend_name,
            latency_ms: start.elapsed().as_millis() as u64,
            attempts,
            outcome,
        };

        self.metrics.record_call(
            &result.tool_name,
            result.backend_name.as_deref(),
            start,
            result.error_code(),
        );
        debug!(
            "Call {} to {} finished in {}ms after {} attempt(s): {}",
            result.request_id,
            result.tool_name,
            result.latency_ms,
            result.attempts,
            result
                .error_code()
                .map(|code| code.as_str())
                .unwrap_or("success")
        );
        result
    }

    fn route(&self, tool_name: &str) -> Result<(&ToolSpec, &BackendDescriptor)> {
        let backend = self.registry.resolve(tool_name)?;
        let tool = self
            .registry
            .tool(tool_name)
            .ok_or_else(|| GatewayError::UnknownTool(tool_name.to_string()))?;
        Ok((tool, backend))
    }

    async fn backend_status(&self, backend: &str) -> HealthStatus {
        self.monitor
            .record(backend)
            .await
            .map(|record| record.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    async fn call_backend(
        &self,
        request: &ToolCallRequest,
        tool: &ToolSpec,
        backend: &BackendDescriptor,
        attempts: &mut u32,
    ) -> Result<Value> {
        if policy::admit(self.backend_status(&backend.name).await) == Admission::Reject {
            return Err(GatewayError::BackendUnavailable(backend.name.clone()));
        }

        let timeout = self.timeout_for(tool, backend);
        let deadline = tokio::time::Instant::now() + timeout;
        let body = request.backend_body()?;
        let url = backend.call_url();

        loop {
            *attempts += 1;
            let attempt = self.send_once(backend, &url, &request.request_id, body.clone());

            let error = match tokio::time::timeout_at(deadline, attempt).await {
                Ok(Ok(value)) => {
                    self.monitor.record_dispatch_success(&backend.name).await;
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => GatewayError::UpstreamTimeout {
                    backend: backend.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                },
            };

            self.monitor.record_dispatch_failure(&backend.name, &error).await;

            let decision = policy::should_retry(&RetryContext {
                attempts: *attempts,
                idempotent: tool.idempotent,
                error: &error,
                status: self.backend_status(&backend.name).await,
                remaining: deadline.saturating_duration_since(tokio::time::Instant::now()),
                backoff: self.config.retry_backoff(),
            });

            match decision {
                RetryDecision::Retry { backoff } => {
                    warn!(
                        "Call {} to {} on {} failed (attempt {}): {}, retrying in {}ms",
                        request.request_id,
                        tool.name,
                        backend.name,
                        attempts,
                        error,
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                }
                RetryDecision::GiveUp(reason) => {
                    debug!(
                        "Call {} to {} failed, not retrying ({}): {}",
                        request.request_id, tool.name, reason, error
                    );
                    return Err(error);
                }
            }
        }
    }

    async fn send_once(
        &self,
        backend: &BackendDescriptor,
        url: &str,
        request_id: &str,
        body: Vec<u8>,
    ) -> Result<Value> {
        let response =
            upstream::post_json(&self.client, &backend.name, url, request_id, body).await?;

        if !response.status.is_success() {
            // 4xx with a proper failure reply is the tool refusing the call.
            if response.status.is_client_error() {
                if let Ok(reply) = serde_json::from_slice::<BackendReply>(&response.body) {
                    if !reply.success {
                        return Err(GatewayError::ToolFailed {
                            backend: backend.name.clone(),
                            message: reply.error_message(),
                        });
                    }
                }
            }
            return Err(GatewayError::UpstreamStatus {
                backend: backend.name.clone(),
                status: response.status.as_u16(),
            });
        }

        let reply: BackendReply =
            serde_json::from_slice(&response.body).map_err(|e| GatewayError::InvalidResponse {
                backend: backend.name.clone(),
                message: e.to_string(),
            })?;

        if reply.success {
            Ok(reply.result.unwrap_or(Value::Null))
        } else {
            Err(GatewayError::ToolFailed {
                backend: backend.name.clone(),
                message: reply.error_message(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health_monitor::{CheckOutcome, HealthCheckConfig};
    use toolmesh_common::config::GatewayConfig;

    const CONFIG: &str = r#"
[dispatch]
default_timeout_ms = 30000

[[backends]]
name = "memory"
base_url = "http://127.0.0.1:1"
timeout_ms = 8000
tools = ["store_memory", { name = "search_memory", idempotent = true, timeout_ms = 2000 }]

[[backends]]
name = "git"
base_url = "http://127.0.0.1:1"
tools = ["git_status"]
"#;

    fn dispatcher() -> Dispatcher {
        let config: GatewayConfig = toml::from_str(CONFIG).unwrap();
        let registry = Arc::new(ServiceRegistry::from_config(&config).unwrap());
        let client = upstream::build_client();
        let monitor = HealthMonitor::new(&registry, HealthCheckConfig::default(), client.clone());
        Dispatcher::new(
            registry,
            monitor,
            GatewayMetricsCollector::new("test"),
            client,
            config.dispatch,
        )
    }

    #[test]
    fn test_timeout_precedence() {
        let dispatcher = dispatcher();
        let registry = dispatcher.registry.clone();
        let memory = registry.backend("memory").unwrap();
        let git = registry.backend("git").unwrap();

        let search = registry.tool("search_memory").unwrap();
        assert_eq!(dispatcher.timeout_for(search, memory), Duration::from_secs(2));

        let store = registry.tool("store_memory").unwrap();
        assert_eq!(dispatcher.timeout_for(store, memory), Duration::from_secs(8));

        let status = registry.tool("git_status").unwrap();
        assert_eq!(dispatcher.timeout_for(status, git), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unknown_tool_makes_no_attempt() {
        let dispatcher = dispatcher();
        let result = dispatcher
            .dispatch(ToolCallRequest::new("launch_rockets", serde_json::json!({})))
            .await;

        assert_eq!(result.error_code(), Some(ErrorCode::UnknownTool));
        assert_eq!(result.attempts, 0);
        assert!(result.backend_name.is_none());
        assert_eq!(dispatcher.metrics.snapshot().errors_by_code["UNKNOWN_TOOL"], 1);
    }

    #[tokio::test]
    async fn test_unhealthy_backend_fails_fast() {
        let dispatcher = dispatcher();
        for _ in 0..3 {
            dispatcher
                .monitor
                .apply_check(
                    "git",
                    CheckOutcome {
                        latency: Duration::from_millis(1),
                        result: Err("refused".into()),
                    },
                )
                .await;
        }

        let start = Instant::now();
        let result = dispatcher
            .dispatch(ToolCallRequest::new("git_status", serde_json::json!({})))
            .await;

        assert_eq!(result.error_code(), Some(ErrorCode::BackendUnavailable));
        assert_eq!(result.attempts, 0);
        assert_eq!(result.backend_name.as_deref(), Some("git"));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_request_id_preserved() {
        let dispatcher = dispatcher();
        let request =
            ToolCallRequest::new("nothing_here", serde_json::json!({})).with_request_id("abc-123");
        let result = dispatcher.dispatch(request).await;
        assert_eq!(result.request_id, "abc-123");
        assert_eq!(result.tool_name, "nothing_here");
    }
}
