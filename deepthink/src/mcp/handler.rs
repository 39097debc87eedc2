//! MCP JSON-RPC 2.0 handler

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::tools::{ToolContext, ToolRegistry};
use crate::Error;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "deepseek-r1";

/// Message shown to clients when a tool fails for reasons they cannot fix
pub const TOOL_FAILURE_MESSAGE: &str = "Failed to process thinking request";

// JSON-RPC error codes
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Requests without an id are notifications and get no response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }
}

/// A typed block of tool output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

/// Result envelope for every `tools/call`, success or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: true,
        }
    }
}

/// Protocol features advertised during `initialize`
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    pub tools: Value,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self { tools: json!({}) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Per-call information about the session a request arrived on
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
}

/// MCP protocol handler
pub struct McpHandler {
    tools: Arc<ToolRegistry>,
    capabilities: ServerCapabilities,
    server_info: ServerInfo,
}

impl McpHandler {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handle a JSON-RPC request. Returns `None` for notifications.
    pub async fn handle(&self, req: JsonRpcRequest, ctx: &SessionContext) -> Option<JsonRpcResponse> {
        if req.is_notification() {
            tracing::debug!(session = %ctx.session_id, method = %req.method, "Notification received");
            return None;
        }

        if req.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                req.id,
                INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            ));
        }

        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(req.id),
            "ping" => JsonRpcResponse::success(req.id, json!({})),
            "tools/list" => self.handle_tools_list(req.id),
            "tools/call" => self.handle_tools_call(req.id, req.params, ctx).await,
            _ => JsonRpcResponse::error(
                req.id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", req.method),
            ),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": self.capabilities,
                "serverInfo": self.server_info,
            }),
        )
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        let tools = self.tools.list();
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        ctx: &SessionContext,
    ) -> JsonRpcResponse {
        let params = match params {
            Some(p) => p,
            None => return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"),
        };

        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n,
            None => return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing tool name"),
        };

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args) => args.clone(),
        };

        let result = self.call_tool(name, arguments, ctx).await;
        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                tracing::error!("Failed to serialize tool result: {}", e);
                JsonRpcResponse::error(id, INTERNAL_ERROR, "Internal error")
            }
        }
    }

    /// Run a tool and fold every outcome into a [`CallToolResult`]
    pub async fn call_tool(&self, name: &str, arguments: Value, ctx: &SessionContext) -> CallToolResult {
        let Some(tool) = self.tools.resolve(name) else {
            tracing::warn!(session = %ctx.session_id, tool = name, "Call to unknown tool");
            return CallToolResult::error(Error::ToolNotFound(name.to_string()).to_string());
        };

        if let Err(e) = tool.validate(&arguments) {
            tracing::debug!(session = %ctx.session_id, tool = name, "Rejected arguments: {}", e);
            let detail = match e {
                Error::InvalidArguments(detail) => detail,
                other => other.to_string(),
            };
            return CallToolResult::error(format!("Invalid arguments for {}: {}", name, detail));
        }

        let tool_ctx = ToolContext {
            session_id: ctx.session_id.clone(),
        };
        match tool.call(arguments, &tool_ctx).await {
            Ok(text) => CallToolResult::text(text),
            Err(e) => {
                tracing::error!(session = %ctx.session_id, tool = name, "Tool call failed: {}", e);
                CallToolResult::error(TOOL_FAILURE_MESSAGE)
            }
        }
    }
}
