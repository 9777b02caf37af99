//! Coordinator configuration.
//!
//! Loaded once at startup from a TOML file. Every section except `backends`
//! has defaults, so a minimal file only lists the backends:
//!
//! ```toml
//! [[backends]]
//! name = "memory"
//! base_url = "http://127.0.0.1:8001"
//! tools = ["store_memory", { name = "search_memory", idempotent = true }]
//! ```
//!
//! Structural problems (missing fields, bad URLs, zero thresholds) are
//! reported by [`GatewayConfig::validate`]. Duplicate tool names are rejected
//! when the service registry is built from the configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted when no config path is given.
pub const CONFIG_ENV_VAR: &str = "TOOLMESH_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Backend #{index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("Backend {backend}: invalid `{field}`: {reason}")]
    InvalidField {
        backend: String,
        field: &'static str,
        reason: String,
    },

    #[error("Backend name {0} is declared more than once")]
    DuplicateBackend(String),

    #[error("Tool {tool} is declared by both {first} and {second}")]
    DuplicateTool {
        tool: String,
        first: String,
        second: String,
    },

    #[error("Invalid setting `{setting}`: {reason}")]
    InvalidSetting { setting: &'static str, reason: String },
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Value of the `service` field in every envelope
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Largest inbound request body accepted
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_service_name() -> String {
    "toolmesh".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            service_name: default_service_name(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// When false, no checks run and every backend stays `unknown`
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,
    /// Consecutive failures before a backend is marked unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive successes an unhealthy backend needs to be healthy again
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
    /// Successful checks slower than this report `degraded`
    #[serde(default = "default_degraded_latency")]
    pub degraded_latency_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_health_interval() -> u64 {
    15
}

fn default_health_timeout() -> u64 {
    3000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_threshold() -> u32 {
    2
}

fn default_degraded_latency() -> u64 {
    1000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval(),
            timeout_ms: default_health_timeout(),
            failure_threshold: default_failure_threshold(),
            recovery_threshold: default_recovery_threshold(),
            degraded_latency_ms: default_degraded_latency(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn degraded_latency(&self) -> Duration {
        Duration::from_millis(self.degraded_latency_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Deadline for a tool call when neither tool nor backend sets one
    #[serde(default = "default_call_timeout")]
    pub default_timeout_ms: u64,
    /// Pause before the single retry of an idempotent call
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_call_timeout() -> u64 {
    30_000
}

fn default_retry_backoff() -> u64 {
    100
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_call_timeout(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl DispatchConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Idle time after which a client's window is evicted
    #[serde(default = "default_entry_ttl")]
    pub entry_ttl_secs: u64,
}

fn default_requests_per_window() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_entry_ttl() -> u64 {
    300
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            entry_ttl_secs: default_entry_ttl(),
        }
    }
}

/// Accepted bearer tokens. Empty means authentication is off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// One backend as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_health_path")]
    pub health_check_path: String,
    #[serde(default = "default_call_path")]
    pub call_path: String,
    /// Overrides `dispatch.default_timeout_ms` for every tool of this backend
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_call_path() -> String {
    "/call".to_string()
}

/// A tool is either a bare name or a table with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        idempotent: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl ToolEntry {
    pub fn name(&self) -> &str {
        match self {
            ToolEntry::Name(name) => name,
            ToolEntry::Detailed { name, .. } => name,
        }
    }

    pub fn idempotent(&self) -> bool {
        match self {
            ToolEntry::Name(_) => false,
            ToolEntry::Detailed { idempotent, .. } => *idempotent,
        }
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        match self {
            ToolEntry::Name(_) => None,
            ToolEntry::Detailed { timeout_ms, .. } => *timeout_ms,
        }
    }
}

impl GatewayConfig {
    /// Reads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            "Loaded config from {} with {} backends",
            path.display(),
            config.backends.len()
        );
        Ok(config)
    }

    /// Parses and validates config text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_settings()?;

        for (index, backend) in self.backends.iter().enumerate() {
            backend.validate(index)?;
        }

        Ok(())
    }

    fn validate_settings(&self) -> Result<(), ConfigError> {
        let health = &self.health;
        if health.failure_threshold == 0 {
            return Err(invalid_setting("health.failure_threshold", "must be at least 1"));
        }
        if health.recovery_threshold == 0 {
            return Err(invalid_setting("health.recovery_threshold", "must be at least 1"));
        }
        if health.interval_secs == 0 {
            return Err(invalid_setting("health.interval_secs", "must be positive"));
        }
        if health.timeout_ms == 0 {
            return Err(invalid_setting("health.timeout_ms", "must be positive"));
        }
        if self.dispatch.default_timeout_ms == 0 {
            return Err(invalid_setting("dispatch.default_timeout_ms", "must be positive"));
        }
        if self.rate_limit.enabled {
            if self.rate_limit.requests_per_window == 0 {
                return Err(invalid_setting(
                    "rate_limit.requests_per_window",
                    "must be at least 1 (set enabled = false to turn limiting off)",
                ));
            }
            if self.rate_limit.window_secs == 0 {
                return Err(invalid_setting("rate_limit.window_secs", "must be positive"));
            }
        }
        if self.server.service_name.trim().is_empty() {
            return Err(invalid_setting("server.service_name", "must not be empty"));
        }
        if self.auth.tokens.iter().any(|t| t.trim().is_empty()) {
            return Err(invalid_setting("auth.tokens", "tokens must not be empty"));
        }
        Ok(())
    }
}

impl BackendConfig {
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField { index, field: "name" });
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField { index, field: "base_url" });
        }
        if self.base_url.starts_with("https://") {
            return Err(self.invalid(
                "base_url",
                "TLS is not supported for backends, terminate it in front of the tool service",
            ));
        }
        if !self.base_url.starts_with("http://") {
            return Err(self.invalid("base_url", "must start with http://"));
        }
        if !self.health_check_path.starts_with('/') {
            return Err(self.invalid("health_check_path", "must start with '/'"));
        }
        if !self.call_path.starts_with('/') {
            return Err(self.invalid("call_path", "must start with '/'"));
        }
        if self.tools.is_empty() {
            return Err(ConfigError::MissingField { index, field: "tools" });
        }
        if self.tools.iter().any(|t| t.name().trim().is_empty()) {
            return Err(self.invalid("tools", "tool names must not be empty"));
        }
        if self.timeout_ms == Some(0) || self.tools.iter().any(|t| t.timeout_ms() == Some(0)) {
            return Err(self.invalid("timeout_ms", "must be positive"));
        }
        Ok(())
    }

    fn invalid(&self, field: &'static str, reason: &str) -> ConfigError {
        ConfigError::InvalidField {
            backend: self.name.clone(),
            field,
            reason: reason.to_string(),
        }
    }
}

fn invalid_setting(setting: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        setting,
        reason: reason.to_string(),
    }
}
