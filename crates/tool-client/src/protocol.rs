//! Wire types for the tool-server RPC protocol.
//!
//! Every tool server exposes two operations at its base URL, both plain
//! HTTP POSTs with a JSON body:
//!
//! - list-tools: `{"method": "tools/list"}`
//! - call-tool:  `{"method": "tools/call", "params": {"name": …, "arguments": …}}`
//!
//! Responses are `{"tools": […]}`, and `{"result": …}` or
//! `{"error": {"message": …, "kind": …}}` respectively. A structured
//! `error` is a *tool-level* failure and is never retried; transport
//! failures are classified separately by the client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An RPC request envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Build a `tools/list` request.
    pub fn list_tools() -> Self {
        Self {
            method: "tools/list".into(),
            params: None,
        }
    }

    /// Build a `tools/call` request.
    pub fn call_tool(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: "tools/call".into(),
            params: Some(serde_json::json!({
                "name": name.into(),
                "arguments": arguments,
            })),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single tool schema returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the tool's argument shape.
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    /// Roles allowed to see and invoke this tool. Empty = open to all.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// The result payload from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResponse {
    pub tools: Vec<ToolSpec>,
}

/// A tool-level failure reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFault {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// The result payload from `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFault>,
}

impl CallToolResponse {
    /// Split the response into the success value or the tool fault.
    pub fn into_result(self) -> Result<Value, ToolFault> {
        if let Some(fault) = self.error {
            Err(fault)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_list_request() {
        let req = RpcRequest::list_tools();
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"method":"tools/list"}"#);
    }

    #[test]
    fn serialize_call_request() {
        let req = RpcRequest::call_tool("lookup", serde_json::json!({"x": "foo"}));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"method\":\"tools/call\""));
        assert!(json.contains("\"name\":\"lookup\""));
        assert!(json.contains("\"x\":\"foo\""));
    }

    #[test]
    fn deserialize_tools_list() {
        let raw = r#"{
            "tools": [
                {
                    "name": "lookup",
                    "description": "Look something up",
                    "parameters": {
                        "type": "object",
                        "properties": { "x": { "type": "string" } },
                        "required": ["x"]
                    },
                    "allowed_roles": ["sales_rep"]
                }
            ]
        }"#;
        let resp: ListToolsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.tools.len(), 1);
        assert_eq!(resp.tools[0].name, "lookup");
        assert_eq!(resp.tools[0].allowed_roles, ["sales_rep"]);
    }

    #[test]
    fn tool_spec_defaults_missing_fields() {
        let raw = r#"{ "tools": [{ "name": "ping" }] }"#;
        let resp: ListToolsResponse = serde_json::from_str(raw).unwrap();
        let spec = &resp.tools[0];
        assert_eq!(spec.description, "");
        assert!(spec.allowed_roles.is_empty());
        assert_eq!(spec.parameters["type"], "object");
    }

    #[test]
    fn deserialize_call_success() {
        let raw = r#"{"result": {"value": 42}}"#;
        let resp: CallToolResponse = serde_json::from_str(raw).unwrap();
        let value = resp.into_result().unwrap();
        assert_eq!(value["value"], 42);
    }

    #[test]
    fn deserialize_call_error() {
        let raw = r#"{"error": {"message": "bad", "kind": "query_failed"}}"#;
        let resp: CallToolResponse = serde_json::from_str(raw).unwrap();
        let fault = resp.into_result().unwrap_err();
        assert_eq!(fault.message, "bad");
        assert_eq!(fault.kind.as_deref(), Some("query_failed"));
    }

    #[test]
    fn call_with_null_result_is_null() {
        let raw = r#"{}"#;
        let resp: CallToolResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn roundtrip_request() {
        let req = RpcRequest::call_tool("t", serde_json::json!({"a": 1}));
        let parsed: RpcRequest =
            serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(req, parsed);
    }
}
