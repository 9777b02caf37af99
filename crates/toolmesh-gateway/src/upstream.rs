//! Outbound HTTP to backends.
//!
//! One pooled hyper client is shared by the health monitor and the
//! dispatcher. Nothing here applies a timeout; callers wrap these futures in
//! their own deadline so dropping the future cancels the request.

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use toolmesh_common::{GatewayError, Result};

/// Header carrying the caller's request id to the backend.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Largest reply body accepted from a backend.
const MAX_REPLY_BYTES: usize = 16 * 1024 * 1024;

pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

pub fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Status and body of a backend response.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// `GET url`, reading the whole body.
pub async fn get(client: &HttpClient, backend: &str, url: &str) -> Result<UpstreamResponse> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(url)
        .body(Full::new(Bytes::new()))
        .map_err(|e| transport(backend, format!("Failed to build request: {}", e)))?;
    send(client, backend, request).await
}

/// `POST url` with a JSON body and the request id header.
pub async fn post_json(
    client: &HttpClient,
    backend: &str,
    url: &str,
    request_id: &str,
    body: Vec<u8>,
) -> Result<UpstreamResponse> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(url)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .header(REQUEST_ID_HEADER, request_id)
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| transport(backend, format!("Failed to build request: {}", e)))?;
    send(client, backend, request).await
}

async fn send(
    client: &HttpClient,
    backend: &str,
    request: Request<Full<Bytes>>,
) -> Result<UpstreamResponse> {
    let response = client
        .request(request)
        .await
        .map_err(|e| transport(backend, format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    let body = Limited::new(response.into_body(), MAX_REPLY_BYTES)
        .collect()
        .await
        .map_err(|e| transport(backend, format!("Failed to read response: {}", e)))?
        .to_bytes();

    Ok(UpstreamResponse { status, body })
}

fn transport(backend: &str, message: String) -> GatewayError {
    GatewayError::Transport {
        backend: backend.to_string(),
        message,
    }
}
