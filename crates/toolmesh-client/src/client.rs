use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{header, Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use thiserror::Error;
use toolmesh_common::{ResponseEnvelope, ToolCallRequest};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid gateway URL {0}: must start with http://")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for a toolmesh coordinator.
///
/// Tool calls always come back as a [`ResponseEnvelope`], including failures
/// the gateway answered with a 4xx or 5xx. `Err` means the gateway could not
/// be reached or did not answer with an envelope.
#[derive(Clone)]
pub struct GatewayClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") {
            return Err(ClientError::InvalidUrl(base_url));
        }

        Ok(Self {
            base_url,
            token: None,
            timeout: Duration::from_secs(60),
            client: Client::builder(TokioExecutor::new()).build_http(),
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Calls `tool` with `arguments` under a fresh request id.
    pub async fn call_tool(
        &self,
        tool: impl Into<String>,
        arguments: Value,
    ) -> Result<ResponseEnvelope> {
        self.call(&ToolCallRequest::new(tool, arguments)).await
    }

    pub async fn call(&self, request: &ToolCallRequest) -> Result<ResponseEnvelope> {
        let body = serde_json::to_vec(request)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        let (_, body) = self.send(Method::POST, "/call", Some(body)).await?;

        serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn health(&self) -> Result<Value> {
        self.get_json("/health").await
    }

    pub async fn status(&self) -> Result<Value> {
        self.get_json("/status").await
    }

    pub async fn tools(&self) -> Result<Value> {
        self.get_json("/tools").await
    }

    /// Raw Prometheus text.
    pub async fn metrics(&self) -> Result<String> {
        let (status, body) = self.send(Method::GET, "/metrics", None).await?;
        let text = String::from_utf8_lossy(&body).into_owned();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let (status, body) = self.send(Method::GET, path, None).await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes)> {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{}{}", self.base_url, path));
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        if let Some(token) = &self.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = builder
            .body(Full::new(body.map(Bytes::from).unwrap_or_default()))
            .map_err(|e| ClientError::Transport(format!("Failed to build request: {}", e)))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| ClientError::Transport(format!("Failed to read response: {}", e)))?
                .to_bytes();
            Ok((status, body))
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }
}
