//! toolmesh Response Types
//!
//! This module defines what the coordinator returns to clients and what it
//! expects back from backends.
//!
//! # Response Flow
//!
//! 1. Backend answers with a [`BackendReply`] (`{success, result|error}`)
//! 2. Dispatcher produces an immutable [`ToolCallResult`]
//! 3. HTTP layer turns it into a [`ResponseEnvelope`] and serializes it
//!
//! Every response, success or failure, uses the same envelope so clients only
//! need to look at `success` and `error.code`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ErrorCode, GatewayError};

/// Error object embedded in a failed envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable description, safe to show to clients
    pub message: String,
    /// Whether the client may retry after backing off
    pub retryable: bool,
    /// Suggested wait before retrying (rate limiting only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
            retry_after_ms: None,
        }
    }

    pub fn from_error(error: &GatewayError) -> Self {
        let mut body = Self::new(error.code(), error.client_message());
        if let GatewayError::RateLimited { retry_after_ms } = error {
            body.retry_after_ms = Some(*retry_after_ms);
        }
        body
    }
}

/// Reply a backend sends for a tool call.
///
/// `error` is kept as a raw JSON value because tool services report either a
/// plain string or a structured object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendReply {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl BackendReply {
    /// Flattens the backend error into a message.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            Some(other) => other.to_string(),
            None => "backend reported failure without an error".to_string(),
        }
    }
}

/// Success value or error of a single dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(ErrorBody),
}

/// Immutable result of a dispatch, returned to the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub request_id: String,
    pub tool_name: String,
    /// Backend the tool resolved to (absent for `UNKNOWN_TOOL`)
    pub backend_name: Option<String>,
    /// Wall time spent inside the dispatcher
    pub latency_ms: u64,
    /// Number of network attempts made (0 when short-circuited)
    pub attempts: u32,
    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match &self.outcome {
            ToolOutcome::Success(_) => None,
            ToolOutcome::Failure(body) => Some(body.code),
        }
    }

    /// Wraps the result in the outer envelope.
    pub fn into_envelope(self, service: &str) -> ResponseEnvelope {
        let mut envelope = match self.outcome {
            ToolOutcome::Success(result) => ResponseEnvelope {
                success: true,
                result: Some(result),
                error: None,
                timestamp: Utc::now(),
                service: service.to_string(),
                request_id: Some(self.request_id),
                backend: None,
                latency_ms: None,
            },
            ToolOutcome::Failure(body) => {
                ResponseEnvelope::failure(service, Some(&self.request_id), body)
            }
        };
        envelope.backend = self.backend_name;
        envelope.latency_ms = Some(self.latency_ms);
        envelope
    }
}

/// The uniform envelope every client receives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub timestamp: DateTime<Utc>,
    /// Name of the coordinator that produced the envelope
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Backend that handled the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl ResponseEnvelope {
    pub fn success(
        service: &str,
        request_id: &str,
        backend: &str,
        latency_ms: u64,
        result: Value,
    ) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            timestamp: Utc::now(),
            service: service.to_string(),
            request_id: Some(request_id.to_string()),
            backend: Some(backend.to_string()),
            latency_ms: Some(latency_ms),
        }
    }

    pub fn failure(service: &str, request_id: Option<&str>, error: ErrorBody) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            timestamp: Utc::now(),
            service: service.to_string(),
            request_id: request_id.map(str::to_string),
            backend: None,
            latency_ms: None,
        }
    }

    pub fn from_error(service: &str, request_id: Option<&str>, error: &GatewayError) -> Self {
        Self::failure(service, request_id, ErrorBody::from_error(error))
    }

    /// HTTP status matching the envelope.
    pub fn http_status(&self) -> u16 {
        match &self.error {
            Some(error) if !self.success => error.code.http_status(),
            _ => 200,
        }
    }
}
