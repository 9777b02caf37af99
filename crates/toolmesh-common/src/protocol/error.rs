use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable error code carried in every failed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No registry entry for the requested tool
    UnknownTool,
    /// Client exceeded its request budget
    RateLimited,
    /// Circuit open, the backend is known to be failing
    BackendUnavailable,
    /// Backend did not answer within the call deadline
    UpstreamTimeout,
    /// Backend failed, was unreachable or answered with an error
    UpstreamError,
    /// Inbound envelope could not be decoded
    InvalidRequest,
    /// Missing or invalid bearer token
    Unauthorized,
    /// Coordinator bug; details are logged, never returned
    Internal,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::UnknownTool,
        ErrorCode::RateLimited,
        ErrorCode::BackendUnavailable,
        ErrorCode::UpstreamTimeout,
        ErrorCode::UpstreamError,
        ErrorCode::InvalidRequest,
        ErrorCode::Unauthorized,
        ErrorCode::Internal,
    ];

    /// Position of the code in [`ErrorCode::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnknownTool => "UNKNOWN_TOOL",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// HTTP status used when this code is returned at the HTTP boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::UnknownTool => 404,
            ErrorCode::RateLimited => 429,
            ErrorCode::BackendUnavailable => 503,
            ErrorCode::UpstreamTimeout => 504,
            ErrorCode::UpstreamError => 502,
            ErrorCode::InvalidRequest => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Internal => 500,
        }
    }

    /// Whether a client may reasonably retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited
                | ErrorCode::BackendUnavailable
                | ErrorCode::UpstreamTimeout
                | ErrorCode::UpstreamError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Backend {0} is unavailable")]
    BackendUnavailable(String),

    #[error("Backend {backend} timed out after {timeout_ms}ms")]
    UpstreamTimeout { backend: String, timeout_ms: u64 },

    #[error("Transport error talking to {backend}: {message}")]
    Transport { backend: String, message: String },

    #[error("Backend {backend} returned HTTP {status}")]
    UpstreamStatus { backend: String, status: u16 },

    #[error("Invalid response from {backend}: {message}")]
    InvalidResponse { backend: String, message: String },

    #[error("Tool failed on {backend}: {message}")]
    ToolFailed { backend: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::UnknownTool(_) => ErrorCode::UnknownTool,
            GatewayError::RateLimited { .. } => ErrorCode::RateLimited,
            GatewayError::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            GatewayError::UpstreamTimeout { .. } => ErrorCode::UpstreamTimeout,
            GatewayError::Transport { .. }
            | GatewayError::UpstreamStatus { .. }
            | GatewayError::InvalidResponse { .. }
            | GatewayError::ToolFailed { .. } => ErrorCode::UpstreamError,
            GatewayError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            GatewayError::Unauthorized => ErrorCode::Unauthorized,
            GatewayError::Internal(_)
            | GatewayError::JsonSerialization(_)
            | GatewayError::Io(_) => ErrorCode::Internal,
        }
    }

    /// Message safe to show to a client.
    ///
    /// Internal failures are replaced by a generic message so paths, stack
    /// context and serializer output never leave the process.
    pub fn client_message(&self) -> String {
        match self.code() {
            ErrorCode::Internal => "Internal error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the failure says something about backend liveness.
    ///
    /// A backend that answered with a well-formed application error is
    /// alive, so `ToolFailed` does not count.
    pub fn is_backend_failure(&self) -> bool {
        match self {
            GatewayError::UpstreamTimeout { .. }
            | GatewayError::Transport { .. }
            | GatewayError::InvalidResponse { .. } => true,
            GatewayError::UpstreamStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the same call may be attempted again (idempotent tools only).
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::UpstreamTimeout { .. } | GatewayError::Transport { .. } => true,
            GatewayError::UpstreamStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
