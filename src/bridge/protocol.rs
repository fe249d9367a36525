//! MCP wire protocol (JSON-RPC 2.0 over SSE + POST)
//!
//! Implements the subset of the Model Context Protocol, version 2024-11-05,
//! needed to talk to Home Assistant's MCP server integration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// MCP protocol revision announced during the handshake
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version tag carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Prefix of SSE data lines
pub const SSE_DATA_PREFIX: &str = "data:";

/// Outbound JSON-RPC envelope. Absence of `id` marks a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl JsonRpcRequest {
    /// Create an envelope
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<u64>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// Error object of a JSON-RPC reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Inbound JSON-RPC reply as carried on the push stream
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcReply {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl JsonRpcReply {
    /// Collapse the reply into the value handed to the waiting caller
    pub fn into_outcome(self) -> std::result::Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Command processed by the single outbound consumer, strictly in order
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    /// POST one envelope to the submission endpoint
    Submit(JsonRpcRequest),
    /// Stop the consumer loop
    Shutdown,
}

/// Client identity announced during the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Params of the `initialize` handshake call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

impl InitializeParams {
    /// Handshake params with an empty capability set
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Default::default()),
            client_info: ClientInfo {
                name: client_name.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// One entry of the remote tool catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Extract the payload of an SSE `data:` line, if any
pub fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix(SSE_DATA_PREFIX)?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}

/// Whether `path` is a submission endpoint announced by the MCP server
pub fn is_valid_message_path(path: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^/mcp_server/messages/[A-Z0-9]+$").expect("static pattern compiles")
        })
        .is_match(path)
}

/// Whether a push-stream payload answers a request.
///
/// Replies carry `result` or `error` and never `method`; server-initiated
/// requests and notifications (`ping`, progress) do not count.
pub fn is_reply(value: &Value) -> bool {
    value.get("method").is_none() && (value.get("result").is_some() || value.get("error").is_some())
}

/// Truthiness of a reply payload: null, false, zero and empty containers are falsy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_minimal() {
        let req = JsonRpcRequest::new("test_method", None, None);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"jsonrpc": "2.0", "method": "test_method"})
        );
    }

    #[test]
    fn test_envelope_complete() {
        let req = JsonRpcRequest::new("test_method", Some(json!({"test": true})), Some(123));
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "method": "test_method",
                "params": {"test": true},
                "id": 123
            })
        );
    }

    #[test]
    fn test_valid_message_paths() {
        for path in [
            "/mcp_server/messages/ABC123",
            "/mcp_server/messages/XYZ789",
            "/mcp_server/messages/A1B2C3",
        ] {
            assert!(is_valid_message_path(path), "{} should be valid", path);
        }
    }

    #[test]
    fn test_invalid_message_paths() {
        for path in [
            "/mcp_server/messages/",
            "/mcp_server/messages/abc123",
            "/wrong/path/ABC123",
            "/mcp_server/messages/ABC-123",
            "mcp_server/messages/ABC123",
            "/mcp_server/messages/ABC123/extra",
        ] {
            assert!(!is_valid_message_path(path), "{} should be invalid", path);
        }
    }

    #[test]
    fn test_sse_data() {
        assert_eq!(sse_data("data: /mcp_server/messages/A1"), Some("/mcp_server/messages/A1"));
        assert_eq!(sse_data("data:{\"id\":1}"), Some("{\"id\":1}"));
        assert_eq!(sse_data("data:   "), None);
        assert_eq!(sse_data("event: endpoint"), None);
        assert_eq!(sse_data(""), None);
    }

    #[test]
    fn test_reply_outcome() {
        let ok: JsonRpcReply =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 4, "result": {"a": 1}})).unwrap();
        assert_eq!(ok.id, Some(4));
        assert_eq!(ok.into_outcome().unwrap(), json!({"a": 1}));

        let err: JsonRpcReply = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": 5, "error": {"code": -32601, "message": "nope"}}),
        )
        .unwrap();
        let rpc = err.into_outcome().unwrap_err();
        assert_eq!(rpc.code, -32601);
        assert_eq!(rpc.message, "nope");
    }

    #[test]
    fn test_initialize_params_shape() {
        let params = serde_json::to_value(InitializeParams::new("LurchHome")).unwrap();
        assert_eq!(params["protocolVersion"], "2024-11-05");
        assert_eq!(params["capabilities"], json!({}));
        assert_eq!(params["clientInfo"]["name"], "LurchHome");
        assert!(params["clientInfo"]["version"].is_string());
    }

    #[test]
    fn test_tool_descriptor_defaults() {
        let tool: ToolDescriptor = serde_json::from_value(json!({"name": "HassTurnOn"})).unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_reply_shape() {
        assert!(is_reply(&json!({"jsonrpc": "2.0", "id": 1, "result": {}})));
        assert!(is_reply(&json!({"jsonrpc": "2.0", "id": 1, "result": null})));
        assert!(is_reply(&json!({"id": 1, "error": {"code": -1, "message": "x"}})));
        assert!(!is_reply(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})));
        assert!(!is_reply(&json!({"id": 1})));
        assert!(!is_reply(&json!({"id": 1, "method": "x", "result": 1})));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!({})));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!({"protocolVersion": "2024-11-05"})));
        assert!(is_truthy(&json!(true)));
    }
}
