//! Service registry: the routing table from tool names to backends.
//!
//! Built once from configuration and read-only afterwards, so lookups need no
//! locking. Loading fails fast on anything that would make routing
//! ambiguous: a tool claimed by two backends, two backends sharing a name, or
//! a backend missing a required field.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use toolmesh_common::config::{ConfigError, GatewayConfig};
use toolmesh_common::{GatewayError, Result};

/// A backend tool service, immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub name: String,
    /// Base URL without a trailing slash
    pub base_url: String,
    /// Tools served by this backend, in configuration order
    pub tool_names: Vec<String>,
    pub health_check_path: String,
    pub call_path: String,
    /// Default call timeout for this backend's tools
    pub timeout: Option<Duration>,
}

impl BackendDescriptor {
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_check_path)
    }

    pub fn call_url(&self) -> String {
        format!("{}{}", self.base_url, self.call_path)
    }
}

/// Per-tool routing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub backend: String,
    /// Safe to repeat; only idempotent tools are retried
    pub idempotent: bool,
    #[serde(rename = "timeout_ms", serialize_with = "serialize_timeout")]
    pub timeout: Option<Duration>,
}

fn serialize_timeout<S: serde::Serializer>(
    timeout: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match timeout {
        Some(timeout) => serializer.serialize_some(&(timeout.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    backends: Vec<BackendDescriptor>,
    backend_index: HashMap<String, usize>,
    tools: HashMap<String, ToolSpec>,
}

impl ServiceRegistry {
    /// Builds the routing table, validating the configuration first.
    pub fn from_config(config: &GatewayConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let mut registry = ServiceRegistry::default();

        for backend in &config.backends {
            let name = backend.name.trim().to_string();
            if registry.backend_index.contains_key(&name) {
                return Err(ConfigError::DuplicateBackend(name));
            }

            let mut tool_names = Vec::with_capacity(backend.tools.len());
            for entry in &backend.tools {
                let tool_name = entry.name().trim().to_string();
                if let Some(existing) = registry.tools.get(&tool_name) {
                    return Err(ConfigError::DuplicateTool {
                        tool: tool_name,
                        first: existing.backend.clone(),
                        second: name,
                    });
                }

                registry.tools.insert(
                    tool_name.clone(),
                    ToolSpec {
                        name: tool_name.clone(),
                        backend: name.clone(),
                        idempotent: entry.idempotent(),
                        timeout: entry.timeout_ms().map(Duration::from_millis),
                    },
                );
                tool_names.push(tool_name);
            }

            registry
                .backend_index
                .insert(name.clone(), registry.backends.len());
            registry.backends.push(BackendDescriptor {
                name,
                base_url: backend.base_url.trim().trim_end_matches('/').to_string(),
                tool_names,
                health_check_path: backend.health_check_path.clone(),
                call_path: backend.call_path.clone(),
                timeout: backend.timeout_ms.map(Duration::from_millis),
            });
        }

        Ok(registry)
    }

    /// Backend serving `tool_name`.
    pub fn resolve(&self, tool_name: &str) -> Result<&BackendDescriptor> {
        self.tools
            .get(tool_name)
            .and_then(|spec| self.backend(&spec.backend))
            .ok_or_else(|| GatewayError::UnknownTool(tool_name.to_string()))
    }

    pub fn tool(&self, tool_name: &str) -> Option<&ToolSpec> {
        self.tools.get(tool_name)
    }

    pub fn backend(&self, name: &str) -> Option<&BackendDescriptor> {
        self.backend_index.get(name).map(|&i| &self.backends[i])
    }

    /// All backends in configuration order.
    pub fn backends(&self) -> &[BackendDescriptor] {
        &self.backends
    }

    /// Tool names served by `backend`.
    pub fn capabilities(&self, backend: &str) -> Option<&[String]> {
        self.backend(backend).map(|b| b.tool_names.as_slice())
    }

    /// All tools sorted by name.
    pub fn tools(&self) -> Vec<&ToolSpec> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolmesh_common::ErrorCode;

    fn config(toml: &str) -> GatewayConfig {
        toml::from_str(toml).unwrap()
    }

    const TWO_BACKENDS: &str = r#"
[[backends]]
name = "memory"
base_url = "http://127.0.0.1:8001/"
tools = ["store_memory", { name = "search_memory", idempotent = true, timeout_ms = 2500 }]

[[backends]]
name = "git"
base_url = "http://127.0.0.1:8002"
health_check_path = "/healthz"
call_path = "/tools/call"
timeout_ms = 10000
tools = ["git_status", "git_commit"]
"#;

    #[test]
    fn test_resolve() {
        let registry = ServiceRegistry::from_config(&config(TWO_BACKENDS)).unwrap();

        assert_eq!(registry.resolve("store_memory").unwrap().name, "memory");
        assert_eq!(registry.resolve("git_commit").unwrap().name, "git");
        assert_eq!(registry.backend_count(), 2);
        assert_eq!(registry.tool_count(), 4);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let registry = ServiceRegistry::from_config(&config(TWO_BACKENDS)).unwrap();
        for _ in 0..100 {
            assert_eq!(registry.resolve("git_status").unwrap().name, "git");
        }
    }

    #[test]
    fn test_unknown_tool() {
        let registry = ServiceRegistry::from_config(&config(TWO_BACKENDS)).unwrap();
        let err = registry.resolve("launch_rockets").unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownTool);
        assert!(registry.tool("launch_rockets").is_none());
    }

    #[test]
    fn test_urls() {
        let registry = ServiceRegistry::from_config(&config(TWO_BACKENDS)).unwrap();

        let memory = registry.backend("memory").unwrap();
        assert_eq!(memory.health_url(), "http://127.0.0.1:8001/health");
        assert_eq!(memory.call_url(), "http://127.0.0.1:8001/call");

        let git = registry.backend("git").unwrap();
        assert_eq!(git.health_url(), "http://127.0.0.1:8002/healthz");
        assert_eq!(git.call_url(), "http://127.0.0.1:8002/tools/call");
        assert_eq!(git.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_tool_metadata() {
        let registry = ServiceRegistry::from_config(&config(TWO_BACKENDS)).unwrap();

        let search = registry.tool("search_memory").unwrap();
        assert!(search.idempotent);
        assert_eq!(search.timeout, Some(Duration::from_millis(2500)));

        let store = registry.tool("store_memory").unwrap();
        assert!(!store.idempotent);
        assert_eq!(store.timeout, None);
    }

    #[test]
    fn test_backends_and_capabilities() {
        let registry = ServiceRegistry::from_config(&config(TWO_BACKENDS)).unwrap();

        let names: Vec<_> = registry.backends().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["memory", "git"]);
        assert_eq!(
            registry.capabilities("git").unwrap(),
            &["git_status".to_string(), "git_commit".to_string()]
        );
        assert!(registry.capabilities("nope").is_none());

        let tools: Vec<_> = registry.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tools, ["git_commit", "git_status", "search_memory", "store_memory"]);
    }

    #[test]
    fn test_duplicate_tool_is_fatal() {
        let err = ServiceRegistry::from_config(&config(
            r#"
[[backends]]
name = "a"
base_url = "http://127.0.0.1:1"
tools = ["shared"]

[[backends]]
name = "b"
base_url = "http://127.0.0.1:2"
tools = ["shared"]
"#,
        ))
        .unwrap_err();

        match err {
            ConfigError::DuplicateTool { tool, first, second } => {
                assert_eq!(tool, "shared");
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_tool_within_backend_is_fatal() {
        let err = ServiceRegistry::from_config(&config(
            r#"
[[backends]]
name = "a"
base_url = "http://127.0.0.1:1"
tools = ["x", "x"]
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTool { .. }));
    }

    #[test]
    fn test_duplicate_backend_is_fatal() {
        let err = ServiceRegistry::from_config(&config(
            r#"
[[backends]]
name = "a"
base_url = "http://127.0.0.1:1"
tools = ["x"]

[[backends]]
name = "a"
base_url = "http://127.0.0.1:2"
tools = ["y"]
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateBackend(name) if name == "a"));
    }

    #[test]
    fn test_missing_field_is_fatal() {
        let err = ServiceRegistry::from_config(&config(
            r#"
[[backends]]
base_url = "http://127.0.0.1:1"
tools = ["x"]
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "name", .. }));
    }

    #[test]
    fn test_empty_config() {
        let registry = ServiceRegistry::from_config(&GatewayConfig::default()).unwrap();
        assert_eq!(registry.backend_count(), 0);
        assert!(registry.resolve("anything").is_err());
    }
}
