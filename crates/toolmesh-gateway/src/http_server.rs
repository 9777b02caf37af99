//! HTTP front end for the gateway.
//!
//! Routes:
//!
//! - `POST /call` (and `POST /`): one tool call, answered with a
//!   [`ResponseEnvelope`]
//! - `GET /health`: liveness, never touches a backend
//! - `GET /status`: per-backend health and counters
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /tools`: the routing table
//!
//! A call passes the rate limiter first, then bearer-token authentication,
//! then envelope decoding, and only then reaches the dispatcher. The limiter
//! keys on the peer IP unless the caller presents a token auth accepts.
//! Every rejection on the way is still answered with an envelope.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, ConnectInfo, DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use toolmesh_common::auth::extract_bearer_token;
use toolmesh_common::rate_limit::RateLimitResult;
use toolmesh_common::{GatewayError, ResponseEnvelope, ToolCallRequest};
use toolmesh_metrics::exposition;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::gateway::Gateway;
use crate::upstream::REQUEST_ID_HEADER;

/// HTTP server for the gateway.
pub struct HttpServer {
    gateway: Arc<Gateway>,
}

impl HttpServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Builds the axum router with all routes and layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/call", post(handle_call))
            .route("/", post(handle_call))
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/metrics", get(handle_metrics))
            .route("/tools", get(handle_tools))
            .layer(DefaultBodyLimit::max(self.gateway.max_body_bytes()))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.gateway.clone())
    }

    /// Binds `addr` and serves until Ctrl-C.
    pub async fn run(self, addr: SocketAddr) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    ///
    /// In-flight calls are allowed to finish after `shutdown` fires.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!(
            "{} listening on {}",
            self.gateway.service_name(),
            local_addr
        );

        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("{} stopped", self.gateway.service_name());
        Ok(())
    }
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}

/// Rate limit key: a verified bearer token when present, else the peer address.
fn client_key(token: Option<&str>, peer: Option<SocketAddr>) -> String {
    match (token, peer) {
        (Some(token), _) => format!("token:{}", token),
        (None, Some(peer)) => format!("ip:{}", peer.ip()),
        (None, None) => "ip:unknown".to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn handle_call(
    State(gateway): State<Arc<Gateway>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let token = extract_bearer_token(header_str(&headers, header::AUTHORIZATION.as_str()));
    // Labels rejections only; a decoded body carries its own id.
    let header_request_id = header_str(&headers, REQUEST_ID_HEADER);

    let key = client_key(
        gateway.rate_limit_token(token),
        peer.map(|ConnectInfo(addr)| addr),
    );
    if let RateLimitResult::RateLimited { retry_after } = gateway.check_rate_limit(&key).await {
        debug!("Rate limited {}", key);
        return reject(
            &gateway,
            header_request_id,
            GatewayError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
            },
        );
    }

    if !gateway.authorize(token) {
        let mut response = reject(&gateway, header_request_id, GatewayError::Unauthorized);
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        return response;
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            return reject(
                &gateway,
                header_request_id,
                GatewayError::InvalidRequest(rejection.body_text()),
            )
        }
    };

    let request = match ToolCallRequest::decode(&body) {
        Ok(request) => request,
        Err(e) => return reject(&gateway, header_request_id, e),
    };

    let result = gateway.dispatch(request).await;
    envelope_response(result.into_envelope(gateway.service_name()))
}

/// Answers a call that never reached the dispatcher.
fn reject(gateway: &Gateway, request_id: Option<&str>, error: GatewayError) -> Response {
    gateway.metrics().record_rejection(error.code());
    envelope_response(ResponseEnvelope::from_error(
        gateway.service_name(),
        request_id,
        &error,
    ))
}

fn envelope_response(envelope: ResponseEnvelope) -> Response {
    let status =
        StatusCode::from_u16(envelope.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let retry_after_ms = envelope.error.as_ref().and_then(|e| e.retry_after_ms);
    let request_id = envelope.request_id.clone();

    let mut response = (status, Json(envelope)).into_response();
    let headers = response.headers_mut();
    if let Some(ms) = retry_after_ms {
        // Whole seconds, rounded up, never zero.
        let secs = ms.div_ceil(1000).max(1);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    if let Some(value) = request_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

async fn handle_health(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.liveness())
}

async fn handle_status(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.status().await)
}

async fn handle_metrics(State(gateway): State<Arc<Gateway>>) -> Response {
    match gateway.render_metrics().await {
        Ok(page) => ([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], page).into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn handle_tools(State(gateway): State<Arc<Gateway>>) -> Response {
    Json(gateway.tools()).into_response()
}
