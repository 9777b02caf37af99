use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{GatewayError, Result};

pub type RequestId = String;
pub type ToolName = String;
pub type ToolArgs = Map<String, Value>;

/// Inbound tool call.
///
/// Wire format: `{"tool": "<name>", "arguments": {...}, "request_id": "..."}`.
/// `arguments` defaults to an empty object and `request_id` is generated when
/// the client does not send one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    #[serde(rename = "tool")]
    pub tool_name: ToolName,
    #[serde(default)]
    pub arguments: ToolArgs,
    #[serde(default = "generate_request_id")]
    pub request_id: RequestId,
}

impl ToolCallRequest {
    /// Builds a request with a fresh id.
    ///
    /// Non-object `arguments` are wrapped as `{"value": ...}`; `null` becomes
    /// an empty object.
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        Self {
            tool_name: tool_name.into(),
            arguments,
            request_id: generate_request_id(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Decodes an inbound HTTP body.
    ///
    /// Malformed JSON, a missing `tool` field, non-object `arguments` or an
    /// empty tool name all map to [`GatewayError::InvalidRequest`].
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut request: ToolCallRequest = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        request.tool_name = request.tool_name.trim().to_string();
        if request.tool_name.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "tool name must not be empty".to_string(),
            ));
        }
        if request.request_id.trim().is_empty() {
            request.request_id = generate_request_id();
        }

        Ok(request)
    }

    /// Body forwarded to the backend's call endpoint.
    pub fn backend_body(&self) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "tool": self.tool_name,
            "arguments": self.arguments,
        });
        Ok(serde_json::to_vec(&body)?)
    }
}

fn generate_request_id() -> RequestId {
    uuid::Uuid::new_v4().to_string()
}
