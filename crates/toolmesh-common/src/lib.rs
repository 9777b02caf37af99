//! toolmesh Common Types
//!
//! This crate provides the pieces shared by every toolmesh component: the
//! tool-call envelope codec, the error taxonomy, configuration loading, the
//! per-client rate limiter and bearer-token authentication.
//!
//! # Overview
//!
//! toolmesh is a single-process coordinator sitting in front of a mesh of
//! independently deployed tool services. Clients send one tool call to the
//! coordinator, which resolves the tool name to exactly one backend, forwards
//! the call under a bounded time budget, and wraps the answer in a uniform
//! envelope.
//!
//! - **Protocol Layer**: [`ToolCallRequest`], [`ToolCallResult`], [`ResponseEnvelope`],
//!   [`ErrorCode`] and [`GatewayError`]
//! - **Configuration**: [`config::GatewayConfig`] loaded from TOML
//! - **Rate Limiting**: [`rate_limit::RateLimiter`] fixed-window limiter
//! - **Authentication**: [`auth::AuthConfig`] bearer-token validation
//!
//! # Example
//!
//! ```
//! use toolmesh_common::{ToolCallRequest, ResponseEnvelope};
//! use serde_json::json;
//!
//! let request = ToolCallRequest::new("store_memory", json!({"text": "buy milk"}));
//! let envelope = ResponseEnvelope::success(
//!     "toolmesh",
//!     &request.request_id,
//!     "memory",
//!     12,
//!     json!({"id": 7}),
//! );
//! assert!(envelope.success);
//! ```

pub mod auth;
pub mod config;
pub mod protocol;
pub mod rate_limit;

pub use protocol::*;
